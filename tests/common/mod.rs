#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use tempfile::TempDir;
use url::Url;

use vela::db::models::{AccountRow, AuthorizationRow, NewAccount, RealmRow};
use vela::db::sqlite::Store;
use vela::error::VelaError;
use vela::gateway::{
    AccessToken, AccountSummary, ClientRegistration, DeviceAuthorization, IdentityGateway,
    RoleCredentials, TokenPoll, VerificationPrompt,
};

pub const REALM: &str = "acme";
pub const REGION: &str = "us-east-1";
pub const START_URL: &str = "https://acme.awsapps.com/start";

/// Scripted in-memory gateway. Counters record how often each remote
/// operation ran so tests can assert on network behavior.
pub struct MockGateway {
    /// Accounts (with their SSO role sets) returned by the listing calls.
    pub directory: Vec<(AccountSummary, Vec<String>)>,
    /// Role names FindRoleArn reports as missing.
    pub unknown_roles: Vec<String>,
    /// CreateAccessToken stays pending until this many polls have happened.
    pub token_ready_after: usize,

    pub register_calls: AtomicUsize,
    pub device_calls: AtomicUsize,
    pub token_calls: AtomicUsize,
    pub list_account_calls: AtomicUsize,
    pub list_role_calls: AtomicUsize,
    pub sso_assume_calls: AtomicUsize,
    pub find_role_calls: AtomicUsize,
    pub assume_role_calls: AtomicUsize,
    pub console_calls: AtomicUsize,

    pub last_session_name: Mutex<Option<String>>,
    pub last_duration_secs: Mutex<Option<i32>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            directory: Vec::new(),
            unknown_roles: Vec::new(),
            token_ready_after: 1,
            register_calls: AtomicUsize::new(0),
            device_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            list_account_calls: AtomicUsize::new(0),
            list_role_calls: AtomicUsize::new(0),
            sso_assume_calls: AtomicUsize::new(0),
            find_role_calls: AtomicUsize::new(0),
            assume_role_calls: AtomicUsize::new(0),
            console_calls: AtomicUsize::new(0),
            last_session_name: Mutex::new(None),
            last_duration_secs: Mutex::new(None),
        }
    }

    pub fn pending_forever() -> Self {
        Self {
            token_ready_after: usize::MAX,
            ..Self::new()
        }
    }

    pub fn token_ready_after(polls: usize) -> Self {
        Self {
            token_ready_after: polls,
            ..Self::new()
        }
    }

    /// Total remote operations performed, for "zero gateway calls" checks.
    pub fn total_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
            + self.device_calls.load(Ordering::SeqCst)
            + self.token_calls.load(Ordering::SeqCst)
            + self.list_account_calls.load(Ordering::SeqCst)
            + self.list_role_calls.load(Ordering::SeqCst)
            + self.sso_assume_calls.load(Ordering::SeqCst)
            + self.find_role_calls.load(Ordering::SeqCst)
            + self.assume_role_calls.load(Ordering::SeqCst)
            + self.console_calls.load(Ordering::SeqCst)
    }
}

impl IdentityGateway for MockGateway {
    async fn register_client(
        &self,
        _client_name: &str,
        _region: &str,
    ) -> Result<ClientRegistration, VelaError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ClientRegistration {
            client_id: "client-1".to_string(),
            client_secret: "secret-1".to_string(),
            expires_at: Utc::now() + Duration::days(90),
        })
    }

    async fn authorize_device(
        &self,
        _client_id: &str,
        _client_secret: &str,
        _region: &str,
        _start_url: &str,
    ) -> Result<DeviceAuthorization, VelaError> {
        self.device_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceAuthorization {
            device_code: "device-code-1".to_string(),
            expires_at: Utc::now() + Duration::minutes(10),
            verification_url: "https://device.sso.test/verify?code=ABCD-EFGH".to_string(),
        })
    }

    async fn create_access_token(
        &self,
        _client_id: &str,
        _client_secret: &str,
        _device_code: &str,
        _region: &str,
    ) -> Result<TokenPoll, VelaError> {
        let polls = self.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls >= self.token_ready_after {
            Ok(TokenPoll::Ready(AccessToken {
                token: "sso-access-token".to_string(),
                expires_at: Utc::now() + Duration::hours(8),
            }))
        } else {
            Ok(TokenPoll::Pending)
        }
    }

    async fn list_accounts(
        &self,
        _access_token: &str,
        _region: &str,
    ) -> Result<Vec<AccountSummary>, VelaError> {
        self.list_account_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .directory
            .iter()
            .map(|(summary, _)| summary.clone())
            .collect())
    }

    async fn list_account_roles(
        &self,
        _access_token: &str,
        account_number: &str,
        _region: &str,
    ) -> Result<Vec<String>, VelaError> {
        self.list_role_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .directory
            .iter()
            .find(|(summary, _)| summary.number == account_number)
            .map(|(_, roles)| roles.clone())
            .unwrap_or_default())
    }

    async fn assume_sso_role(
        &self,
        _access_token: &str,
        account_number: &str,
        _region: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, VelaError> {
        self.sso_assume_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RoleCredentials {
            access_key_id: format!("AKIASSO-{account_number}-{role_name}"),
            secret_access_key: "sso-secret".to_string(),
            session_token: "sso-session-token".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn find_role_arn(
        &self,
        _credentials: &RoleCredentials,
        _region: &str,
        role_name: &str,
    ) -> Result<Option<String>, VelaError> {
        self.find_role_calls.fetch_add(1, Ordering::SeqCst);
        if self.unknown_roles.iter().any(|role| role == role_name) {
            Ok(None)
        } else {
            Ok(Some(format!("arn:aws:iam::000000000000:role/{role_name}")))
        }
    }

    async fn assume_role(
        &self,
        _credentials: &RoleCredentials,
        _region: &str,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
    ) -> Result<RoleCredentials, VelaError> {
        self.assume_role_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_session_name.lock().unwrap() = Some(session_name.to_string());
        *self.last_duration_secs.lock().unwrap() = Some(duration_secs);

        let role_name = role_arn.rsplit('/').next().unwrap_or(role_arn);
        Ok(RoleCredentials {
            access_key_id: format!("AKIACHAIN-{role_name}"),
            secret_access_key: "chain-secret".to_string(),
            session_token: "chain-session-token".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn console_signin_url(
        &self,
        _credentials: &RoleCredentials,
        _region: &str,
    ) -> Result<Url, VelaError> {
        self.console_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Url::parse("https://signin.test/federation?Action=login").unwrap())
    }
}

/// Prompt that records the verification URLs it was handed.
pub struct RecordingPrompt {
    pub opened: Mutex<Vec<String>>,
}

impl RecordingPrompt {
    pub fn new() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
        }
    }
}

impl VerificationPrompt for RecordingPrompt {
    fn open(&self, url: &str) {
        self.opened.lock().unwrap().push(url.to_string());
    }
}

/// A fresh store backed by a scratch SQLite file. Keep the TempDir alive for
/// the duration of the test.
pub async fn temp_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let database_url = format!("sqlite:{}", dir.path().join("vela.db").display());
    let store = Store::connect(&database_url)
        .await
        .expect("failed to open scratch database");
    (store, dir)
}

/// Realm plus a fully valid SSO session for REALM/REGION.
pub async fn seed_realm_with_session(store: &Store) -> (RealmRow, AuthorizationRow) {
    let realm = store
        .upsert_realm(REALM, START_URL)
        .await
        .expect("failed to seed realm");

    let mut auth = AuthorizationRow::new(realm.id, REGION, "vela");
    auth.client_id = Some("client-1".to_string());
    auth.client_secret = Some("secret-1".to_string());
    auth.client_secret_expires_at = Some(Utc::now() + Duration::days(30));
    auth.device_code = Some("device-code-1".to_string());
    auth.device_expires_at = Some(Utc::now() + Duration::minutes(10));
    auth.client_access_token = Some("sso-access-token".to_string());
    auth.client_access_token_expires_at = Some(Utc::now() + Duration::hours(8));
    let auth = store
        .upsert_authorization(&auth)
        .await
        .expect("failed to seed authorization");
    (realm, auth)
}

/// Replace the authorization's accounts with the given (number, name, roles)
/// triples and return the stored rows keyed by name.
pub async fn seed_accounts(
    store: &Store,
    realm: &RealmRow,
    auth: &AuthorizationRow,
    accounts: &[(&str, &str, &[&str])],
) -> Vec<AccountRow> {
    let staged: Vec<NewAccount> = accounts
        .iter()
        .map(|(number, name, roles)| NewAccount {
            number: number.to_string(),
            name: name.to_string(),
            email: format!("{name}@example.com"),
            sso_roles: roles.iter().map(|role| role.to_string()).collect(),
        })
        .collect();

    store
        .replace_accounts(auth.id, realm.id, &staged)
        .await
        .expect("failed to seed accounts");

    let mut rows = Vec::new();
    for (_, name, _) in accounts {
        rows.push(
            store
                .find_account_by_name(realm.id, name)
                .await
                .expect("account lookup failed")
                .expect("seeded account missing"),
        );
    }
    rows
}
