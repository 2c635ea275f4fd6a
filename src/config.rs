use std::collections::HashMap;
use std::path::PathBuf;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::VelaError;

pub const APP_NAME: &str = "vela";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Per-realm settings: where the sign-on flow starts and which role to fall
/// back to when the caller names none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmConfig {
    pub start_url: String,
    #[serde(default)]
    pub default_role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub loglevel: String,
    pub default_realm: Option<String>,
    pub default_region: String,
    pub retry_after_secs: u64,
    pub timeout_secs: u64,
    pub user_name: Option<String>,
    #[serde(default)]
    pub realms: HashMap<String, RealmConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            loglevel: "info".to_string(),
            default_realm: None,
            default_region: DEFAULT_REGION.to_string(),
            retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_name: None,
            realms: HashMap::new(),
        }
    }
}

impl Config {
    /// Defaults, overridden by the user's config file, overridden by
    /// `VELA_`-prefixed environment variables.
    pub fn load() -> Result<Self, VelaError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dir) = dirs::config_dir() {
            figment = figment.merge(Toml::file(dir.join(APP_NAME).join("config.toml")));
        }
        figment
            .merge(Env::prefixed("VELA_"))
            .extract()
            .map_err(|e| VelaError::validation(format!("configuration error: {e}")))
    }

    pub fn realm(&self, name: &str) -> Option<&RealmConfig> {
        self.realms.get(name)
    }

    /// User name for role session names, whitespace stripped.
    pub fn session_user(&self) -> String {
        self.user_name
            .clone()
            .unwrap_or_else(whoami::username)
            .split_whitespace()
            .collect()
    }

    /// SQLite creates a missing database file but not its parent directory.
    pub fn prepare_database_path(&self) -> Result<(), VelaError> {
        if let Some(path) = self.database_url.strip_prefix("sqlite:") {
            let db_path = PathBuf::from(path);
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

fn default_database_url() -> String {
    let path = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join(format!("{APP_NAME}.db"));
    format!("sqlite:{}", path.display())
}
