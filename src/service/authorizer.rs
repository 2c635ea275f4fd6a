use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::db::models::AuthorizationRow;
use crate::db::sqlite::Store;
use crate::error::VelaError;
use crate::gateway::{AccessToken, IdentityGateway, TokenPoll, VerificationPrompt};

/// Inputs for one authorization pass. Callers supply everything explicitly;
/// the authorizer reads no ambient configuration.
#[derive(Debug, Clone)]
pub struct AuthorizeParams<'a> {
    pub realm_name: &'a str,
    pub start_url: &'a str,
    pub region: &'a str,
    pub client_name: &'a str,
    pub retry_after: Duration,
    pub timeout: Duration,
}

/// Owns the device-authorization state machine for a (realm, region) pair.
///
/// Each of the three expiries (client secret, device code, access token) is
/// checked independently; steps whose artifacts are still valid are skipped
/// rather than re-run.
pub struct SessionAuthorizer<'a, G> {
    store: &'a Store,
    gateway: &'a G,
    prompt: &'a dyn VerificationPrompt,
}

impl<'a, G: IdentityGateway> SessionAuthorizer<'a, G> {
    pub fn new(store: &'a Store, gateway: &'a G, prompt: &'a dyn VerificationPrompt) -> Self {
        Self {
            store,
            gateway,
            prompt,
        }
    }

    /// Produce a currently-valid SSO session for the realm and region,
    /// running only the device-flow steps whose artifacts have lapsed, and
    /// persist the result. The realm itself is upserted by name.
    pub async fn authorize(
        &self,
        params: AuthorizeParams<'_>,
    ) -> Result<AuthorizationRow, VelaError> {
        let realm = self
            .store
            .upsert_realm(params.realm_name, params.start_url)
            .await?;

        let mut auth = self
            .store
            .find_authorization(realm.id, params.region)
            .await?
            .unwrap_or_else(|| AuthorizationRow::new(realm.id, params.region, params.client_name));

        if auth.is_client_secret_expired() {
            debug!(realm = %params.realm_name, region = %params.region, "registering OAuth client");
            let registration = self
                .gateway
                .register_client(params.client_name, params.region)
                .await?;
            auth.client_id = Some(registration.client_id);
            auth.client_secret = Some(registration.client_secret);
            auth.client_secret_expires_at = Some(registration.expires_at);
        }

        if auth.is_device_expired() && auth.is_access_token_expired() {
            let (client_id, client_secret) = client_pair(&auth, params.realm_name)?;
            debug!(realm = %params.realm_name, region = %params.region, "requesting device authorization");
            let device = self
                .gateway
                .authorize_device(client_id, client_secret, params.region, params.start_url)
                .await?;
            auth.device_code = Some(device.device_code);
            auth.device_expires_at = Some(device.expires_at);
            self.prompt.open(&device.verification_url);
        }

        if auth.is_access_token_expired() {
            let token = self.poll_access_token(&auth, &params).await?;
            auth.client_access_token = Some(token.token);
            auth.client_access_token_expires_at = Some(token.expires_at);
            info!(realm = %params.realm_name, region = %params.region, "SSO session established");
        }

        self.store.upsert_authorization(&auth).await
    }

    /// Redeem the device code for an access token, sleeping `retry_after`
    /// between polls while the provider reports the authorization as
    /// pending. The configured timeout bounds the whole loop; any gateway
    /// failure other than the pending status propagates immediately.
    async fn poll_access_token(
        &self,
        auth: &AuthorizationRow,
        params: &AuthorizeParams<'_>,
    ) -> Result<AccessToken, VelaError> {
        let (client_id, client_secret) = client_pair(auth, params.realm_name)?;
        let device_code = auth.device_code.as_deref().ok_or_else(|| {
            VelaError::validation(format!(
                "no device code on record for realm {} in region {}",
                params.realm_name, params.region
            ))
        })?;

        let started = Instant::now();
        loop {
            let poll = self
                .gateway
                .create_access_token(client_id, client_secret, device_code, params.region)
                .await?;

            match poll {
                TokenPoll::Ready(token) => return Ok(token),
                TokenPoll::Pending => {
                    debug!(realm = %params.realm_name, "authorization pending, retrying");
                    tokio::time::sleep(params.retry_after).await;
                    if started.elapsed() >= params.timeout {
                        return Err(VelaError::timeout(format!(
                            "authorization for realm {} in region {} was not approved within {}s",
                            params.realm_name,
                            params.region,
                            params.timeout.as_secs()
                        )));
                    }
                }
            }
        }
    }
}

fn client_pair<'r>(
    auth: &'r AuthorizationRow,
    realm_name: &str,
) -> Result<(&'r str, &'r str), VelaError> {
    match (auth.client_id.as_deref(), auth.client_secret.as_deref()) {
        (Some(id), Some(secret)) => Ok((id, secret)),
        _ => Err(VelaError::validation(format!(
            "no OAuth client registration on record for realm {realm_name}"
        ))),
    }
}
