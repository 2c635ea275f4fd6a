use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named SSO organization with its sign-on start URL. Re-registering the
/// same name updates the URL in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealmRow {
    pub id: i64,
    pub name: String,
    pub start_url: String,
}

/// One SSO session per (realm, region): the registered OAuth client, the
/// device grant, and the usable access token, each with its own expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationRow {
    pub id: i64,
    pub realm_id: i64,
    pub region: String,
    pub client_name: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub client_secret_expires_at: Option<DateTime<Utc>>,
    pub device_code: Option<String>,
    pub device_expires_at: Option<DateTime<Utc>>,
    pub client_access_token: Option<String>,
    pub client_access_token_expires_at: Option<DateTime<Utc>>,
}

impl AuthorizationRow {
    /// A fresh record with nothing issued yet; every expiry check reports
    /// expired until the corresponding step has run.
    pub fn new(realm_id: i64, region: &str, client_name: &str) -> Self {
        Self {
            id: 0,
            realm_id,
            region: region.to_string(),
            client_name: client_name.to_string(),
            client_id: None,
            client_secret: None,
            client_secret_expires_at: None,
            device_code: None,
            device_expires_at: None,
            client_access_token: None,
            client_access_token_expires_at: None,
        }
    }

    pub fn is_client_secret_expired(&self) -> bool {
        is_expired(self.client_secret_expires_at)
    }

    pub fn is_device_expired(&self) -> bool {
        is_expired(self.device_expires_at)
    }

    pub fn is_access_token_expired(&self) -> bool {
        is_expired(self.client_access_token_expires_at)
    }
}

/// A cloud account discovered through synchronization, tied to the realm and
/// the authorization that listed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountRow {
    pub id: i64,
    pub authorization_id: i64,
    pub realm_id: i64,
    pub number: String,
    pub name: String,
    pub email: String,
}

/// Account data staged for a synchronization pass, roles included.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub number: String,
    pub name: String,
    pub email: String,
    pub sso_roles: Vec<String>,
}

/// A resolved short-lived credential cached per (account, role). Expired
/// rows are deleted and replaced, never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialRow {
    pub id: i64,
    pub account_id: i64,
    pub role_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CredentialRow {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A "not set" expiry counts as expired.
fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
    match expires_at {
        None => true,
        Some(at) => Utc::now() >= at,
    }
}
