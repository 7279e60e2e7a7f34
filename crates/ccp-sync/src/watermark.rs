//! Date range resolution
//!
//! A warehouse run resumes from the newest stored patient-training session: it
//! re-fetches `overlap_days` days up to and including that date, through
//! yesterday. An empty or missing table starts from the history floor. A local
//! run fetches the last week unless the command line overrides either end.

use ccp_common::types::{parse_iso_date, DateRange};
use chrono::{Days, NaiveDate};
use tracing::info;

use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::normalize::TableKind;
use crate::warehouse::Warehouse;

/// Table whose newest session date drives resumption
pub const WATERMARK_TABLE: TableKind = TableKind::PatientTrainingSessions;

pub struct WatermarkResolver<'a> {
    settings: &'a SyncSettings,
}

impl<'a> WatermarkResolver<'a> {
    pub fn new(settings: &'a SyncSettings) -> Self {
        Self { settings }
    }

    /// Range for a warehouse run
    pub async fn resolve(&self, warehouse: &dyn Warehouse, today: NaiveDate) -> Result<DateRange> {
        let end = days_before(today, 1)?;
        let start = match self.watermark(warehouse).await? {
            Some(max_date) => {
                let overlap = u64::from(self.settings.overlap_days.saturating_sub(1));
                let start = days_before(max_date, overlap)?;
                info!(watermark = %max_date, "Resuming from stored sessions");
                start
            },
            None => {
                info!(floor = %self.settings.history_floor, "No stored sessions, starting from floor");
                self.settings.history_floor
            },
        };

        let range = DateRange::new(start, end, today)?;
        info!("Fetching data between {} and {}, inclusive", range.start(), range.end());
        Ok(range)
    }

    /// Range for a local run, with optional overrides
    pub fn resolve_local(
        &self,
        today: NaiveDate,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DateRange> {
        let start = match start {
            Some(start) => start,
            None => days_before(today, u64::from(self.settings.local_window_days))?,
        };
        let end = match end {
            Some(end) => end,
            None => days_before(today, 1)?,
        };

        let range = DateRange::new(start, end, today)?;
        info!("Fetching data between {} and {}, inclusive", range.start(), range.end());
        Ok(range)
    }

    async fn watermark(&self, warehouse: &dyn Warehouse) -> Result<Option<NaiveDate>> {
        if !warehouse.table_exists(WATERMARK_TABLE).await? {
            return Ok(None);
        }

        let Some(column) = WATERMARK_TABLE.date_column() else {
            return Ok(None);
        };

        match warehouse.max_value(WATERMARK_TABLE, column).await? {
            Some(value) => Ok(Some(parse_iso_date(&value)?)),
            None => Ok(None),
        }
    }
}

fn days_before(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_sub_days(Days::new(days))
        .ok_or_else(|| SyncError::config(format!("{} minus {} days is out of range", date, days)))
}
