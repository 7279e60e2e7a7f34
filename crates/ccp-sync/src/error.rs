//! Error taxonomy for the sync engine
//!
//! Every variant except [`SyncError::TokenExpired`] is fatal for the run. Token
//! expiry is normally recovered inside the client and only surfaces once the
//! bounded recovery budget is exhausted. A per-unit `failed` response is not an
//! error at all; it yields zero records.

use ccp_common::CcpError;
use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid date range or unusable settings; raised before any fetch
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server rejected the login credentials
    #[error("Login unsuccessful: {0}")]
    Authentication(String),

    /// The server kept reporting an expired token after repeated re-logins
    #[error("Token still reported as expired after {recoveries} re-login attempts")]
    TokenExpired { recoveries: u32 },

    /// A transient failure outlasted the retry budget
    #[error("Request failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// A non-transient HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A non-transient, non-success status code
    #[error("Server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The server answered with something that is not the expected envelope
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A designated column could not be coerced
    #[error("Cannot coerce column '{column}' in table '{table}': {message}")]
    Normalize {
        table: &'static str,
        column: String,
        message: String,
    },

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Notification error: {0}")]
    Notification(String),
}

impl SyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn warehouse(msg: impl Into<String>) -> Self {
        Self::Warehouse(msg.into())
    }

    /// Whether the error came from the run's own settings rather than a remote system
    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Config(_))
    }
}

impl From<CcpError> for SyncError {
    fn from(err: CcpError) -> Self {
        match err {
            CcpError::InvalidDateRange(msg) => SyncError::Config(msg),
            CcpError::Parse(msg) => SyncError::Config(msg),
        }
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::Config(err.to_string())
    }
}
