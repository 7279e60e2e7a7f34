//! Error types for shared CCP utilities

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CcpError>;

/// Error type for the shared utilities
#[derive(Error, Debug)]
pub enum CcpError {
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
