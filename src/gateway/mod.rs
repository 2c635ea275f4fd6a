//! Boundary to the identity provider and the token-exchange service.
//!
//! Layout:
//! - `mod.rs`: the `IdentityGateway` trait plus the wire-level data types
//! - `aws.rs`: production implementation against IAM Identity Center and STS
//!
//! The engine only ever talks to the trait; tests substitute an in-memory
//! implementation.

pub mod aws;

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::VelaError;

pub use aws::AwsIdentityGateway;

/// OAuth client registration issued by the identity provider.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
    pub expires_at: DateTime<Utc>,
}

/// Device grant handed back by the identity provider. The verification URL
/// is for the human operator; the device code is what the poll loop redeems.
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub expires_at: DateTime<Utc>,
    pub verification_url: String,
}

/// A usable SSO session token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of one access-token poll. "Authorization pending" is an expected
/// state of the device flow, not an error, so it gets its own variant.
#[derive(Debug, Clone)]
pub enum TokenPoll {
    Ready(AccessToken),
    Pending,
}

/// One account as listed by the identity provider.
#[derive(Debug, Clone)]
pub struct AccountSummary {
    pub number: String,
    pub name: String,
    pub email: String,
}

/// A short-lived access key / secret / session token triple.
#[derive(Debug, Clone)]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Remote operations the engine consumes. Failures other than the documented
/// pending status surface as `VelaError::Gateway`; the engine never retries
/// them outside the bounded device-token poll.
#[allow(async_fn_in_trait)]
pub trait IdentityGateway {
    async fn register_client(
        &self,
        client_name: &str,
        region: &str,
    ) -> Result<ClientRegistration, VelaError>;

    async fn authorize_device(
        &self,
        client_id: &str,
        client_secret: &str,
        region: &str,
        start_url: &str,
    ) -> Result<DeviceAuthorization, VelaError>;

    async fn create_access_token(
        &self,
        client_id: &str,
        client_secret: &str,
        device_code: &str,
        region: &str,
    ) -> Result<TokenPoll, VelaError>;

    async fn list_accounts(
        &self,
        access_token: &str,
        region: &str,
    ) -> Result<Vec<AccountSummary>, VelaError>;

    async fn list_account_roles(
        &self,
        access_token: &str,
        account_number: &str,
        region: &str,
    ) -> Result<Vec<String>, VelaError>;

    async fn assume_sso_role(
        &self,
        access_token: &str,
        account_number: &str,
        region: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, VelaError>;

    async fn find_role_arn(
        &self,
        credentials: &RoleCredentials,
        region: &str,
        role_name: &str,
    ) -> Result<Option<String>, VelaError>;

    async fn assume_role(
        &self,
        credentials: &RoleCredentials,
        region: &str,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
    ) -> Result<RoleCredentials, VelaError>;

    async fn console_signin_url(
        &self,
        credentials: &RoleCredentials,
        region: &str,
    ) -> Result<Url, VelaError>;
}

/// Collaborator that puts a verification URL in front of the operator,
/// typically by opening a browser. Injected so the authorizer stays testable.
pub trait VerificationPrompt {
    fn open(&self, url: &str);
}

/// Prompt that only logs the URL; callers that cannot open a browser still
/// see where to go.
pub struct LogPrompt;

impl VerificationPrompt for LogPrompt {
    fn open(&self, url: &str) {
        tracing::info!(url = %url, "complete the device authorization in your browser");
        println!("Open to authorize: {url}");
    }
}
