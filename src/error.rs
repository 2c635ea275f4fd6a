use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum VelaError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("device authorization timed out: {0}")]
    Timeout(String),

    #[error("identity provider error: {0}")]
    Gateway(String),

    #[error("database error: {0}")]
    Database(#[from] SqlxError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VelaError {
    pub fn not_found(context: impl Into<String>) -> Self {
        VelaError::NotFound(context.into())
    }

    pub fn validation(context: impl Into<String>) -> Self {
        VelaError::Validation(context.into())
    }

    pub fn timeout(context: impl Into<String>) -> Self {
        VelaError::Timeout(context.into())
    }

    pub fn gateway(context: impl Into<String>) -> Self {
        VelaError::Gateway(context.into())
    }

    /// NotFound and Validation indicate caller or configuration mistakes and
    /// must never be retried.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, VelaError::NotFound(_) | VelaError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VelaError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, VelaError::Validation(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, VelaError::Timeout(_))
    }
}
