//! CCP Sync Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental sync of CCP training sessions and nurse profiles from the
//! reporting API into a warehouse.
//!
//! # Overview
//!
//! - **api**: Authenticated client with token-expiry recovery and retrying transport
//! - **fetch**: Concurrent per-date and per-identifier fan-out
//! - **normalize**: Type coercion and content fingerprints
//! - **watermark**: Date range resolution
//! - **warehouse**: Storage backends and merge semantics
//! - **notify**: Failure notification for production runs
//!
//! # Example
//!
//! ```no_run
//! use ccp_sync::config::SyncConfig;
//! use ccp_sync::pipeline::{run_configured, Destination, RangeRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::load(None)?;
//!     let today = chrono::Local::now().date_naive();
//!     let report = run_configured(&config, Destination::Warehouse, RangeRequest::Watermark, today)
//!         .await?;
//!     println!("{} identifiers", report.identifiers);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod identifiers;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod warehouse;
pub mod watermark;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use pipeline::{Destination, RangeRequest, SyncPipeline, SyncReport};
