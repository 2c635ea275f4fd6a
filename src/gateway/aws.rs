use std::time::Duration as StdDuration;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use url::Url;

use crate::error::VelaError;
use crate::gateway::{
    AccessToken, AccountSummary, ClientRegistration, DeviceAuthorization, IdentityGateway,
    RoleCredentials, TokenPoll,
};

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const FEDERATION_ENDPOINT: &str = "https://signin.aws.amazon.com/federation";
const CONSOLE_URL: &str = "https://console.aws.amazon.com/";

/// Production `IdentityGateway` backed by IAM Identity Center (SSO OIDC +
/// SSO portal), STS, IAM, and the console federation endpoint.
pub struct AwsIdentityGateway {
    http: reqwest::Client,
}

impl AwsIdentityGateway {
    /// Create a new gateway with a preconfigured HTTP client for the
    /// federation endpoint; the SDK clients are built per call since each
    /// call may target a different region or borrowed credential.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("vela/0.3")
            .connect_timeout(StdDuration::from_secs(5))
            .timeout(StdDuration::from_secs(15))
            .build()
            .expect("FATAL: initialize AwsIdentityGateway HTTP client failed");
        Self { http }
    }

    async fn anonymous_config(&self, region: &str) -> SdkConfig {
        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .no_credentials()
            .load()
            .await
    }

    async fn borrowed_config(&self, region: &str, credentials: &RoleCredentials) -> SdkConfig {
        let provider = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            Some(credentials.session_token.clone()),
            None,
            "vela",
        );
        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(provider)
            .load()
            .await
    }
}

impl Default for AwsIdentityGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGateway for AwsIdentityGateway {
    async fn register_client(
        &self,
        client_name: &str,
        region: &str,
    ) -> Result<ClientRegistration, VelaError> {
        let config = self.anonymous_config(region).await;
        let oidc = aws_sdk_ssooidc::Client::new(&config);

        let response = oidc
            .register_client()
            .client_name(client_name)
            .client_type("public")
            .send()
            .await
            .map_err(|e| {
                VelaError::gateway(format!(
                    "could not register client {client_name}: {}",
                    aws_sdk_ssooidc::error::DisplayErrorContext(&e)
                ))
            })?;

        Ok(ClientRegistration {
            client_id: response
                .client_id()
                .ok_or_else(|| missing("RegisterClient", "clientId"))?
                .to_string(),
            client_secret: response
                .client_secret()
                .ok_or_else(|| missing("RegisterClient", "clientSecret"))?
                .to_string(),
            expires_at: from_epoch_secs(response.client_secret_expires_at())
                .ok_or_else(|| missing("RegisterClient", "clientSecretExpiresAt"))?,
        })
    }

    async fn authorize_device(
        &self,
        client_id: &str,
        client_secret: &str,
        region: &str,
        start_url: &str,
    ) -> Result<DeviceAuthorization, VelaError> {
        let config = self.anonymous_config(region).await;
        let oidc = aws_sdk_ssooidc::Client::new(&config);

        let response = oidc
            .start_device_authorization()
            .client_id(client_id)
            .client_secret(client_secret)
            .start_url(start_url)
            .send()
            .await
            .map_err(|e| {
                VelaError::gateway(format!(
                    "could not authorize device for {start_url}: {}",
                    aws_sdk_ssooidc::error::DisplayErrorContext(&e)
                ))
            })?;

        Ok(DeviceAuthorization {
            device_code: response
                .device_code()
                .ok_or_else(|| missing("AuthorizeDevice", "deviceCode"))?
                .to_string(),
            expires_at: Utc::now() + Duration::seconds(i64::from(response.expires_in())),
            verification_url: response
                .verification_uri_complete()
                .ok_or_else(|| missing("AuthorizeDevice", "verificationUriComplete"))?
                .to_string(),
        })
    }

    async fn create_access_token(
        &self,
        client_id: &str,
        client_secret: &str,
        device_code: &str,
        region: &str,
    ) -> Result<TokenPoll, VelaError> {
        let config = self.anonymous_config(region).await;
        let oidc = aws_sdk_ssooidc::Client::new(&config);

        let result = oidc
            .create_token()
            .client_id(client_id)
            .client_secret(client_secret)
            .device_code(device_code)
            .grant_type(DEVICE_GRANT_TYPE)
            .send()
            .await;

        match result {
            Ok(response) => Ok(TokenPoll::Ready(AccessToken {
                token: response
                    .access_token()
                    .ok_or_else(|| missing("CreateAccessToken", "accessToken"))?
                    .to_string(),
                expires_at: Utc::now() + Duration::seconds(i64::from(response.expires_in())),
            })),
            Err(e) => {
                if e.as_service_error()
                    .is_some_and(|svc| svc.is_authorization_pending_exception())
                {
                    Ok(TokenPoll::Pending)
                } else {
                    Err(VelaError::gateway(format!(
                        "could not create access token: {}",
                        aws_sdk_ssooidc::error::DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    async fn list_accounts(
        &self,
        access_token: &str,
        region: &str,
    ) -> Result<Vec<AccountSummary>, VelaError> {
        let config = self.anonymous_config(region).await;
        let sso = aws_sdk_sso::Client::new(&config);

        let mut stream = sso
            .list_accounts()
            .access_token(access_token)
            .into_paginator()
            .items()
            .send();

        let mut accounts = Vec::new();
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| {
                VelaError::gateway(format!(
                    "could not list accounts: {}",
                    aws_sdk_sso::error::DisplayErrorContext(&e)
                ))
            })?;
            accounts.push(AccountSummary {
                number: info
                    .account_id()
                    .ok_or_else(|| missing("ListAccounts", "accountId"))?
                    .to_string(),
                name: info
                    .account_name()
                    .ok_or_else(|| missing("ListAccounts", "accountName"))?
                    .to_string(),
                email: info
                    .email_address()
                    .ok_or_else(|| missing("ListAccounts", "emailAddress"))?
                    .to_string(),
            });
        }
        Ok(accounts)
    }

    async fn list_account_roles(
        &self,
        access_token: &str,
        account_number: &str,
        region: &str,
    ) -> Result<Vec<String>, VelaError> {
        let config = self.anonymous_config(region).await;
        let sso = aws_sdk_sso::Client::new(&config);

        let mut stream = sso
            .list_account_roles()
            .access_token(access_token)
            .account_id(account_number)
            .into_paginator()
            .items()
            .send();

        let mut roles = Vec::new();
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| {
                VelaError::gateway(format!(
                    "could not list roles for account {account_number}: {}",
                    aws_sdk_sso::error::DisplayErrorContext(&e)
                ))
            })?;
            if let Some(role_name) = info.role_name() {
                roles.push(role_name.to_string());
            }
        }
        Ok(roles)
    }

    async fn assume_sso_role(
        &self,
        access_token: &str,
        account_number: &str,
        region: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, VelaError> {
        let config = self.anonymous_config(region).await;
        let sso = aws_sdk_sso::Client::new(&config);

        let response = sso
            .get_role_credentials()
            .role_name(role_name)
            .account_id(account_number)
            .access_token(access_token)
            .send()
            .await
            .map_err(|e| {
                VelaError::gateway(format!(
                    "could not assume role {role_name} in account {account_number}: {}",
                    aws_sdk_sso::error::DisplayErrorContext(&e)
                ))
            })?;

        let creds = response
            .role_credentials()
            .ok_or_else(|| missing("AssumeSsoRole", "roleCredentials"))?;

        Ok(RoleCredentials {
            access_key_id: creds
                .access_key_id()
                .ok_or_else(|| missing("AssumeSsoRole", "accessKeyId"))?
                .to_string(),
            secret_access_key: creds
                .secret_access_key()
                .ok_or_else(|| missing("AssumeSsoRole", "secretAccessKey"))?
                .to_string(),
            session_token: creds
                .session_token()
                .ok_or_else(|| missing("AssumeSsoRole", "sessionToken"))?
                .to_string(),
            // The portal reports expiration in epoch milliseconds.
            expires_at: DateTime::from_timestamp_millis(creds.expiration())
                .ok_or_else(|| missing("AssumeSsoRole", "expiration"))?,
        })
    }

    async fn find_role_arn(
        &self,
        credentials: &RoleCredentials,
        region: &str,
        role_name: &str,
    ) -> Result<Option<String>, VelaError> {
        let config = self.borrowed_config(region, credentials).await;
        let iam = aws_sdk_iam::Client::new(&config);

        match iam.get_role().role_name(role_name).send().await {
            Ok(response) => Ok(Some(
                response
                    .role()
                    .ok_or_else(|| missing("FindRoleArn", "Role"))?
                    .arn()
                    .to_string(),
            )),
            Err(e) => {
                if e.as_service_error()
                    .is_some_and(|svc| svc.is_no_such_entity_exception())
                {
                    Ok(None)
                } else {
                    Err(VelaError::gateway(format!(
                        "could not look up role {role_name}: {}",
                        aws_sdk_iam::error::DisplayErrorContext(&e)
                    )))
                }
            }
        }
    }

    async fn assume_role(
        &self,
        credentials: &RoleCredentials,
        region: &str,
        role_arn: &str,
        session_name: &str,
        duration_secs: i32,
    ) -> Result<RoleCredentials, VelaError> {
        let config = self.borrowed_config(region, credentials).await;
        let sts = aws_sdk_sts::Client::new(&config);

        let response = sts
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(duration_secs)
            .send()
            .await
            .map_err(|e| {
                VelaError::gateway(format!(
                    "could not assume role {role_arn}: {}",
                    aws_sdk_sts::error::DisplayErrorContext(&e)
                ))
            })?;

        let creds = response
            .credentials()
            .ok_or_else(|| missing("AssumeRole", "Credentials"))?;

        Ok(RoleCredentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expires_at: from_epoch_secs(creds.expiration().secs())
                .ok_or_else(|| missing("AssumeRole", "Expiration"))?,
        })
    }

    async fn console_signin_url(
        &self,
        credentials: &RoleCredentials,
        region: &str,
    ) -> Result<Url, VelaError> {
        let session = serde_json::json!({
            "sessionId": credentials.access_key_id,
            "sessionKey": credentials.secret_access_key,
            "sessionToken": credentials.session_token,
        });

        let session = session.to_string();
        let response: SigninTokenResponse = self
            .http
            .get(FEDERATION_ENDPOINT)
            .query(&[("Action", "getSigninToken"), ("Session", session.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let destination = if region.is_empty() {
            CONSOLE_URL.to_string()
        } else {
            format!("{CONSOLE_URL}?region={region}#")
        };

        let mut url = Url::parse(FEDERATION_ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("Action", "login")
            .append_pair("Issuer", "amazon.com")
            .append_pair("Destination", &destination)
            .append_pair("SigninToken", &response.signin_token);
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct SigninTokenResponse {
    #[serde(rename = "SigninToken")]
    signin_token: String,
}

fn missing(operation: &str, field: &str) -> VelaError {
    VelaError::gateway(format!("{operation} response is missing {field}"))
}

fn from_epoch_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
