//! Concurrent fan-out of per-unit API calls
//!
//! Each unit (a date, or a nurse identifier) is one request. Units run through a
//! tokio stream with buffer_unordered, so at most `concurrency` requests are in
//! flight. The first error aborts the batch.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use tracing::info;

use crate::error::Result;

/// Upper bound for the host-sized default
const MAX_DEFAULT_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct RangeFetcher {
    concurrency: usize,
}

impl RangeFetcher {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// `min(32, cpus + 4)`
    pub fn sized_to_host() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(MAX_DEFAULT_CONCURRENCY.min(cpus + 4))
    }

    pub fn from_setting(concurrency: Option<usize>) -> Self {
        concurrency.map_or_else(Self::sized_to_host, Self::new)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `f` over every unit and flatten the per-unit results
    ///
    /// Output order is unspecified.
    pub async fn fetch_all<U, T, F, Fut>(&self, units: Vec<U>, f: F) -> Result<Vec<T>>
    where
        F: Fn(U) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let total = units.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        info!("Fetching {} units (concurrency={})", total, self.concurrency);

        let batches: Vec<Vec<T>> = stream::iter(units)
            .map(f)
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }
}
