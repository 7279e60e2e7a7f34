//! Client for the CCP reporting API

pub mod client;
pub mod transport;
pub mod types;

pub use client::{ApiClient, MAX_TOKEN_RECOVERIES};
pub use transport::RetryingTransport;
pub use types::{ApiEnvelope, ApiResult, Operation, Record};
