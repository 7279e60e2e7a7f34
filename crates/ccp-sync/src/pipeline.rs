//! Sync pipeline
//!
//! One run:
//!   1. fetch patient and nurse training sessions for every date in the range
//!   2. normalize and append them (fingerprint-deduplicated)
//!   3. read the referenced personnel identifiers back from the warehouse
//!   4. fetch one profile per identifier and merge them into `nurses`
//!
//! Network fan-out happens in the fetcher; normalization and writes run here,
//! after each batch has completed.

use ccp_common::types::DateRange;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Instant;
use tracing::{error, info};

use crate::api::{ApiClient, Record};
use crate::config::{SyncConfig, SyncSettings};
use crate::error::Result;
use crate::fetch::RangeFetcher;
use crate::identifiers::collect_identifiers;
use crate::normalize::{normalize, TableKind};
use crate::notify::{failure_message, report_failure, FailureReporter, SlackReporter};
use crate::warehouse::{
    LoadOutcome, LocalWarehouse, PostgresWarehouse, Warehouse, WarehouseLoader,
};
use crate::watermark::WatermarkResolver;

/// How the run's date range is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Resume from the warehouse watermark
    Watermark,
    /// Fixed window with optional command-line overrides
    Local {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub range: DateRange,
    pub extracted_at: DateTime<Utc>,
    pub tables: Vec<(TableKind, LoadOutcome)>,
    pub identifiers: usize,
    pub duration_seconds: f64,
}

impl SyncReport {
    /// Outcome for one table; all zeros when nothing was fetched for it
    pub fn table(&self, kind: TableKind) -> LoadOutcome {
        self.tables
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| *outcome)
            .unwrap_or_default()
    }

    pub fn log(&self) {
        for (kind, outcome) in &self.tables {
            info!(
                table = %kind,
                fetched = outcome.received,
                written = outcome.written,
                duplicates = outcome.duplicates_skipped,
                "Table summary"
            );
        }
        info!(
            range = %self.range,
            identifiers = self.identifiers,
            duration_secs = self.duration_seconds,
            "Sync complete"
        );
    }
}

pub struct SyncPipeline<'a> {
    client: &'a ApiClient,
    warehouse: &'a dyn Warehouse,
    settings: &'a SyncSettings,
    fetcher: RangeFetcher,
}

impl<'a> SyncPipeline<'a> {
    pub fn new(
        client: &'a ApiClient,
        warehouse: &'a dyn Warehouse,
        settings: &'a SyncSettings,
    ) -> Self {
        Self {
            client,
            warehouse,
            settings,
            fetcher: RangeFetcher::from_setting(settings.concurrency),
        }
    }

    /// Resolve and validate the date range; performs no API calls
    pub async fn resolve_range(&self, request: RangeRequest, today: NaiveDate) -> Result<DateRange> {
        let resolver = WatermarkResolver::new(self.settings);
        match request {
            RangeRequest::Watermark => resolver.resolve(self.warehouse, today).await,
            RangeRequest::Local { start, end } => resolver.resolve_local(today, start, end),
        }
    }

    pub async fn run(&self, range: DateRange) -> Result<SyncReport> {
        let started = Instant::now();
        let loader = WarehouseLoader::new(self.warehouse);
        let mut tables = Vec::new();

        info!(range = %range, days = range.len_days(), "Syncing training sessions");
        for kind in [TableKind::PatientTrainingSessions, TableKind::NurseTrainingSessions] {
            let records = self.fetch_sessions(kind, &range).await?;
            if let Some(outcome) = self.load(&loader, kind, records).await? {
                tables.push((kind, outcome));
            }
        }

        let identifiers = collect_identifiers(self.warehouse).await?;
        info!(count = identifiers.len(), "Syncing nurse profiles");

        if !identifiers.is_empty() {
            let client = self.client;
            let records = self
                .fetcher
                .fetch_all(identifiers.clone(), |username| async move {
                    client.fetch_nurse_details(&username).await
                })
                .await?;
            if let Some(outcome) = self.load(&loader, TableKind::Nurses, records).await? {
                tables.push((TableKind::Nurses, outcome));
            }
        }

        let report = SyncReport {
            range,
            extracted_at: loader.extracted_at(),
            tables,
            identifiers: identifiers.len(),
            duration_seconds: started.elapsed().as_secs_f64(),
        };
        report.log();

        Ok(report)
    }

    async fn fetch_sessions(
        &self,
        kind: TableKind,
        range: &DateRange,
    ) -> Result<Vec<Record>> {
        let client = self.client;
        match kind {
            TableKind::PatientTrainingSessions => {
                self.fetcher
                    .fetch_all(range.days(), |date| client.fetch_patient_training(date))
                    .await
            },
            TableKind::NurseTrainingSessions => {
                self.fetcher
                    .fetch_all(range.days(), |date| client.fetch_nurse_training(date))
                    .await
            },
            TableKind::Nurses => Ok(Vec::new()),
        }
    }

    async fn load(
        &self,
        loader: &WarehouseLoader<'_>,
        kind: TableKind,
        records: Vec<Record>,
    ) -> Result<Option<LoadOutcome>> {
        match normalize(kind, records)? {
            Some(table) => Ok(Some(loader.load(table).await?)),
            None => {
                info!(table = %kind, "No records found");
                Ok(None)
            },
        }
    }
}

/// Where a run writes its tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Postgres warehouse, resuming from the watermark
    Warehouse,
    /// JSON-lines files under `local.output_dir`
    Local,
}

/// Run a full sync for `config`, notifying on failure in production
///
/// The returned error is always the one that stopped the run.
pub async fn run_configured(
    config: &SyncConfig,
    destination: Destination,
    request: RangeRequest,
    today: NaiveDate,
) -> Result<SyncReport> {
    match execute(config, destination, request, today).await {
        Ok(report) => Ok(report),
        Err(err) => {
            error!(error = %err, "Sync failed");
            let message = failure_message(
                &config.source_name,
                &err,
                config.notifications.run_url.as_deref(),
            );
            let reporter = match SlackReporter::from_config(&config.notifications) {
                Ok(reporter) => reporter,
                Err(e) => {
                    error!("Cannot build Slack reporter: {}", e);
                    None
                },
            };
            let reporter = reporter.as_ref().map(|r| r as &dyn FailureReporter);
            Err(report_failure(config.environment, reporter, &message, err).await)
        },
    }
}

async fn execute(
    config: &SyncConfig,
    destination: Destination,
    request: RangeRequest,
    today: NaiveDate,
) -> Result<SyncReport> {
    let warehouse: Box<dyn Warehouse> = match destination {
        Destination::Warehouse => Box::new(PostgresWarehouse::connect(&config.database).await?),
        Destination::Local => Box::new(LocalWarehouse::new(&config.local.output_dir)),
    };
    let client = ApiClient::new(&config.api, &config.retry)?;

    let pipeline = SyncPipeline::new(&client, warehouse.as_ref(), &config.sync);
    let range = pipeline.resolve_range(request, today).await?;
    pipeline.run(range).await
}
