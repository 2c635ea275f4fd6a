use std::time::Duration;

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vela::config::{APP_NAME, Config};
use vela::db::models::{AccountRow, CredentialRow};
use vela::db::sqlite::Store;
use vela::error::VelaError;
use vela::gateway::{AwsIdentityGateway, IdentityGateway, LogPrompt, VerificationPrompt};
use vela::service::authorizer::{AuthorizeParams, SessionAuthorizer};
use vela::service::directory;
use vela::service::resolver::{CredentialResolver, ResolveRequest};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = APP_NAME, version, about = "Short-lived cloud credentials on top of an SSO session")]
struct Cli {
    /// SSO realm to operate on; falls back to the configured default.
    #[arg(long, global = true)]
    realm: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Authorize to a realm, then optionally resolve credentials for accounts.
    Auth {
        /// Account id, name, or regular expression.
        identifier: Option<String>,
        /// Role to assume.
        #[arg(long)]
        role: Option<String>,
        /// Intermediary role to assume first when the target is not an SSO role.
        #[arg(long)]
        from_role: Option<String>,
        /// Seconds to wait between authorization polls.
        #[arg(long)]
        retry_after: Option<u64>,
        /// Seconds before the authorization poll gives up.
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Refresh the local account directory from the identity provider.
    Sync {
        #[arg(long)]
        region: Option<String>,
    },
    /// List the accounts of a realm.
    Accounts {
        /// Regular expression filtering account names.
        #[arg(long, default_value = "^.*$")]
        pattern: String,
    },
    /// Resolve credentials for matching accounts.
    Creds {
        /// Account id, name, or regular expression.
        identifier: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        from_role: Option<String>,
    },
    /// List cached credentials.
    #[command(name = "creds-list")]
    CredsList {
        /// Include expired credentials in the output.
        #[arg(long)]
        expired: bool,
    },
    /// Open the web console for matching accounts.
    Console {
        /// Account id, name, or regular expression.
        identifier: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        from_role: Option<String>,
        #[arg(long)]
        region: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    cfg.prepare_database_path()?;
    let store = Store::connect(&cfg.database_url).await?;
    let gateway = AwsIdentityGateway::new();

    run(cli, &cfg, &store, &gateway).await?;
    Ok(())
}

async fn run(
    cli: Cli,
    cfg: &Config,
    store: &Store,
    gateway: &AwsIdentityGateway,
) -> Result<(), VelaError> {
    match cli.command {
        Command::Auth {
            identifier,
            role,
            from_role,
            retry_after,
            timeout,
        } => {
            let realm_name = required_realm(cli.realm, cfg)?;
            let realm_cfg = cfg.realm(&realm_name).ok_or_else(|| {
                VelaError::validation(format!("no configuration for realm {realm_name}"))
            })?;

            let prompt = LogPrompt;
            let authorizer = SessionAuthorizer::new(store, gateway, &prompt);
            authorizer
                .authorize(AuthorizeParams {
                    realm_name: &realm_name,
                    start_url: &realm_cfg.start_url,
                    region: &cfg.default_region,
                    client_name: APP_NAME,
                    retry_after: Duration::from_secs(retry_after.unwrap_or(cfg.retry_after_secs)),
                    timeout: Duration::from_secs(timeout.unwrap_or(cfg.timeout_secs)),
                })
                .await?;
            println!("Authorized to realm {realm_name}");

            if let Some(identifier) = identifier {
                let resolved = resolve_for_identifier(
                    store,
                    gateway,
                    cfg,
                    &realm_name,
                    &cfg.default_region,
                    &identifier,
                    role.as_deref(),
                    from_role.as_deref(),
                )
                .await?;
                for (account, credential) in resolved {
                    print_credential(&account, &credential);
                }
            }
        }
        Command::Sync { region } => {
            let realm_name = required_realm(cli.realm, cfg)?;
            let region = region.unwrap_or_else(|| cfg.default_region.clone());
            let count = directory::synchronize_accounts(store, gateway, &realm_name, &region).await?;
            println!("Synchronized {count} accounts for realm {realm_name}");
        }
        Command::Accounts { pattern } => {
            let realm_name = required_realm(cli.realm, cfg)?;
            let listings = directory::list_accounts(store, &realm_name, &pattern).await?;
            if listings.is_empty() {
                warn!(realm = %realm_name, "no accounts found");
                return Ok(());
            }
            for listing in listings {
                println!(
                    "{:<14} {:<24} {:<40} {}",
                    listing.account.number,
                    listing.account.name,
                    listing.sso_roles.join(", "),
                    listing.account.email
                );
            }
        }
        Command::Creds {
            identifier,
            role,
            from_role,
        } => {
            let realm_name = required_realm(cli.realm, cfg)?;
            let resolved = resolve_for_identifier(
                store,
                gateway,
                cfg,
                &realm_name,
                &cfg.default_region,
                &identifier,
                role.as_deref(),
                from_role.as_deref(),
            )
            .await?;
            for (account, credential) in resolved {
                print_credential(&account, &credential);
            }
        }
        Command::CredsList { expired } => {
            let rows = store.list_credentials().await?;
            let mut shown = 0usize;
            for (credential, account) in rows {
                if credential.is_expired() && !expired {
                    continue;
                }
                println!(
                    "{:<24} {:<24} {:<24} {}",
                    account.name,
                    credential.role_name,
                    credential.access_key_id,
                    credential.expires_at
                );
                shown += 1;
            }
            if shown == 0 {
                warn!("no credentials found");
            }
        }
        Command::Console {
            identifier,
            role,
            from_role,
            region,
        } => {
            let realm_name = required_realm(cli.realm, cfg)?;
            let region = region.unwrap_or_else(|| cfg.default_region.clone());
            let resolved = resolve_for_identifier(
                store,
                gateway,
                cfg,
                &realm_name,
                &region,
                &identifier,
                role.as_deref(),
                from_role.as_deref(),
            )
            .await?;

            let prompt = LogPrompt;
            for (account, credential) in resolved {
                let creds = vela::gateway::RoleCredentials {
                    access_key_id: credential.access_key_id.clone(),
                    secret_access_key: credential.secret_access_key.clone(),
                    session_token: credential.session_token.clone(),
                    expires_at: credential.expires_at,
                };
                let url = gateway.console_signin_url(&creds, &region).await?;
                info!(account = %account.name, "console sign-in URL issued");
                prompt.open(url.as_str());
            }
        }
    }
    Ok(())
}

/// Resolve a credential for every account the identifier matches, using the
/// realm's configured default role when the caller names none.
#[allow(clippy::too_many_arguments)]
async fn resolve_for_identifier(
    store: &Store,
    gateway: &AwsIdentityGateway,
    cfg: &Config,
    realm_name: &str,
    region: &str,
    identifier: &str,
    role: Option<&str>,
    from_role: Option<&str>,
) -> Result<Vec<(AccountRow, CredentialRow)>, VelaError> {
    let accounts = directory::find_accounts(store, realm_name, identifier).await?;
    info!(identifier = %identifier, matched = accounts.len(), "resolved account identifier");
    if accounts.is_empty() {
        warn!(identifier = %identifier, "identifier matched no accounts");
        return Ok(Vec::new());
    }

    let fallback_role = cfg
        .realm(realm_name)
        .and_then(|realm| realm.default_role.as_deref());
    let resolver = CredentialResolver::new(store, gateway);
    let user = cfg.session_user();

    let mut resolved = Vec::with_capacity(accounts.len());
    for account in accounts {
        let role_name = role.or(fallback_role).ok_or_else(|| {
            VelaError::validation(format!(
                "no role given for account {} and no default_role configured",
                account.name
            ))
        })?;
        let intermediary = from_role.or(fallback_role);
        let session_name = format!("{APP_NAME}-{user}-{role_name}");

        let credential = resolver
            .resolve(ResolveRequest {
                realm_name,
                region,
                account_name: &account.name,
                role_name,
                session_name: &session_name,
                intermediary_role: intermediary,
            })
            .await?;
        resolved.push((account, credential));
    }
    Ok(resolved)
}

fn required_realm(cli_realm: Option<String>, cfg: &Config) -> Result<String, VelaError> {
    cli_realm
        .or_else(|| cfg.default_realm.clone())
        .ok_or_else(|| VelaError::validation("no realm provided and no default_realm configured"))
}

fn print_credential(account: &AccountRow, credential: &CredentialRow) {
    println!(
        "Authorized to account {} as {} (access key {}, expires {})",
        account.name, credential.role_name, credential.access_key_id, credential.expires_at
    );
}
