use futures::future::LocalBoxFuture;
use tracing::{debug, info};

use crate::db::models::CredentialRow;
use crate::db::sqlite::Store;
use crate::error::VelaError;
use crate::gateway::{IdentityGateway, RoleCredentials};

/// Hard cap on intermediary chaining. A configuration that needs more hops
/// than this is treated as broken rather than recursed into.
pub const MAX_ROLE_CHAIN_DEPTH: usize = 4;

/// Duration requested for credentials minted through the token-exchange
/// service, in seconds.
pub const SESSION_DURATION_SECS: i32 = 3600;

/// Identifies the credential being asked for. The intermediary role is only
/// consulted when the target role is not directly assumable from the SSO
/// session.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub realm_name: &'a str,
    pub region: &'a str,
    pub account_name: &'a str,
    pub role_name: &'a str,
    pub session_name: &'a str,
    pub intermediary_role: Option<&'a str>,
}

/// Resolves (account, role) to a usable short-lived credential: cache first,
/// direct SSO assumption when the role is in the account's SSO set,
/// otherwise a chained assumption through the intermediary role.
pub struct CredentialResolver<'a, G> {
    store: &'a Store,
    gateway: &'a G,
}

impl<'a, G: IdentityGateway> CredentialResolver<'a, G> {
    pub fn new(store: &'a Store, gateway: &'a G) -> Self {
        Self { store, gateway }
    }

    pub async fn resolve(&self, request: ResolveRequest<'_>) -> Result<CredentialRow, VelaError> {
        self.resolve_at(request, 0).await
    }

    fn resolve_at<'s>(
        &'s self,
        request: ResolveRequest<'s>,
        depth: usize,
    ) -> LocalBoxFuture<'s, Result<CredentialRow, VelaError>> {
        Box::pin(async move {
            if depth >= MAX_ROLE_CHAIN_DEPTH {
                return Err(VelaError::validation(format!(
                    "role chain for {} in account {} exceeds {} hops",
                    request.role_name, request.account_name, MAX_ROLE_CHAIN_DEPTH
                )));
            }

            let realm = self
                .store
                .find_realm(request.realm_name)
                .await?
                .ok_or_else(|| {
                    VelaError::not_found(format!("realm {} is not registered", request.realm_name))
                })?;

            let account = self
                .store
                .find_account_by_name(realm.id, request.account_name)
                .await?
                .ok_or_else(|| {
                    VelaError::not_found(format!(
                        "account {} was not found in realm {}",
                        request.account_name, request.realm_name
                    ))
                })?;

            if let Some(cached) = self
                .store
                .find_credential(account.id, request.role_name)
                .await?
            {
                if !cached.is_expired() {
                    debug!(
                        account = %account.name,
                        role = %request.role_name,
                        "returning cached credential"
                    );
                    return Ok(cached);
                }
                // No stale row survives past this point.
                self.store.delete_credential(cached.id).await?;
            }

            let authorization = self
                .store
                .find_authorization(realm.id, request.region)
                .await?
                .ok_or_else(|| {
                    VelaError::not_found(format!(
                        "not authorized to realm {} in region {}; run authorization first",
                        request.realm_name, request.region
                    ))
                })?;

            let creds = if self
                .store
                .has_sso_role(account.id, request.role_name)
                .await?
            {
                let access_token = authorization.client_access_token.as_deref().ok_or_else(|| {
                    VelaError::not_found(format!(
                        "no SSO session token for realm {} in region {}; run authorization first",
                        request.realm_name, request.region
                    ))
                })?;

                debug!(account = %account.name, role = %request.role_name, "assuming SSO role");
                self.gateway
                    .assume_sso_role(
                        access_token,
                        &account.number,
                        request.region,
                        request.role_name,
                    )
                    .await?
            } else {
                let intermediary = request
                    .intermediary_role
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        VelaError::validation(format!(
                            "role {} in account {} is not directly assumable and no intermediary role was provided",
                            request.role_name, request.account_name
                        ))
                    })?;

                if intermediary == request.role_name {
                    return Err(VelaError::validation(format!(
                        "role {} cannot be its own intermediary",
                        request.role_name
                    )));
                }

                debug!(
                    account = %account.name,
                    role = %request.role_name,
                    intermediary = %intermediary,
                    "chaining through intermediary role"
                );

                let intermediary_credential = self
                    .resolve_at(
                        ResolveRequest {
                            role_name: intermediary,
                            session_name: "",
                            intermediary_role: None,
                            ..request
                        },
                        depth + 1,
                    )
                    .await?;
                let borrowed = borrow_credentials(&intermediary_credential);

                let role_arn = self
                    .gateway
                    .find_role_arn(&borrowed, request.region, request.role_name)
                    .await?
                    .ok_or_else(|| {
                        VelaError::not_found(format!(
                            "role {} was not found in account {}",
                            request.role_name, request.account_name
                        ))
                    })?;

                self.gateway
                    .assume_role(
                        &borrowed,
                        request.region,
                        &role_arn,
                        request.session_name,
                        SESSION_DURATION_SECS,
                    )
                    .await?
            };

            let stored = self
                .store
                .insert_credential(account.id, request.role_name, &creds)
                .await?;
            info!(
                account = %account.name,
                role = %request.role_name,
                expires_at = %stored.expires_at,
                "credential issued"
            );
            Ok(stored)
        })
    }
}

fn borrow_credentials(credential: &CredentialRow) -> RoleCredentials {
    RoleCredentials {
        access_key_id: credential.access_key_id.clone(),
        secret_access_key: credential.secret_access_key.clone(),
        session_token: credential.session_token.clone(),
        expires_at: credential.expires_at,
    }
}
