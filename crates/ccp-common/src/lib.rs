//! CCP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the CCP sync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Custom error types and result types
//! - **Checksums**: Content fingerprints over canonical JSON
//! - **Logging**: Tracing subscriber setup shared by every binary
//! - **Types**: Shared domain types such as [`types::DateRange`]
//!
//! # Example
//!
//! ```no_run
//! use ccp_common::checksum::content_md5;
//! use serde_json::json;
//!
//! let fingerprint = content_md5(&json!({"date": "01-02-2024", "total_trained": "12"}));
//! assert_eq!(fingerprint.len(), 32);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CcpError, Result};
