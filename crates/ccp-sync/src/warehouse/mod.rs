//! Warehouse storage and load semantics
//!
//! The [`Warehouse`] trait is the storage seam: a handful of queries plus two
//! bulk writes. [`WarehouseLoader`] implements the merge rules on top of it:
//!
//! - Session tables are append-only. Rows whose fingerprint is already stored
//!   for the batch's date range, or repeated within the batch, are skipped, so
//!   re-fetching the overlap window never duplicates a session.
//! - `nurses` is a dimension keyed by `username`. Existing and new rows are
//!   concatenated, the last row per key wins, and the table is replaced.
//!
//! Every newly loaded row is stamped with the run's `_extracted_at` and its own
//! `_extracted_uuid`.

pub mod local;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::Record;
use crate::error::Result;
use crate::normalize::{Table, TableKind, WritePolicy, FINGERPRINT_COLUMN};

pub use local::LocalWarehouse;
pub use postgres::PostgresWarehouse;

/// One stored row: the normalized record plus lineage columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseRow {
    #[serde(rename = "_extracted_at")]
    pub extracted_at: DateTime<Utc>,

    #[serde(rename = "_extracted_uuid")]
    pub extracted_uuid: Uuid,

    #[serde(flatten)]
    pub record: Record,
}

impl WarehouseRow {
    pub fn new(record: Record, extracted_at: DateTime<Utc>) -> Self {
        Self {
            extracted_at,
            extracted_uuid: Uuid::new_v4(),
            record,
        }
    }

    /// Column value rendered as text; `None` for absent or null values
    pub fn text(&self, column: &str) -> Option<String> {
        value_text(self.record.get(column)?)
    }
}

pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Storage backend for the three warehouse tables
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn table_exists(&self, table: TableKind) -> Result<bool>;

    /// Largest non-null value of `column`, compared as text
    ///
    /// `None` for a missing or empty table. ISO dates compare correctly as text.
    async fn max_value(&self, table: TableKind, column: &str) -> Result<Option<String>>;

    /// Distinct non-null values of `column`; empty for a missing table
    async fn distinct_values(&self, table: TableKind, column: &str) -> Result<Vec<String>>;

    async fn read_rows(&self, table: TableKind) -> Result<Vec<WarehouseRow>>;

    /// Fingerprints of stored rows whose date column lies in `[start, end]`
    async fn fingerprints_between(
        &self,
        table: TableKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashSet<String>>;

    /// Add rows in one atomic write, creating the table if needed
    async fn append(&self, table: TableKind, rows: Vec<WarehouseRow>) -> Result<()>;

    /// Swap the table's contents for `rows` in one atomic write
    async fn replace(&self, table: TableKind, rows: Vec<WarehouseRow>) -> Result<()>;
}

/// Outcome of loading one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOutcome {
    /// Normalized rows handed to the loader
    pub received: usize,
    /// Rows appended, or rows in the table after a merge
    pub written: usize,
    /// Fact rows dropped because their fingerprint was already stored
    pub duplicates_skipped: usize,
}

/// Applies the per-table write policy against a [`Warehouse`]
pub struct WarehouseLoader<'a> {
    warehouse: &'a dyn Warehouse,
    extracted_at: DateTime<Utc>,
}

impl<'a> WarehouseLoader<'a> {
    /// Loader stamping rows with the current time, truncated to seconds
    pub fn new(warehouse: &'a dyn Warehouse) -> Self {
        Self::with_extracted_at(warehouse, Utc::now())
    }

    pub fn with_extracted_at(warehouse: &'a dyn Warehouse, extracted_at: DateTime<Utc>) -> Self {
        Self {
            warehouse,
            extracted_at: extracted_at.trunc_subsecs(0),
        }
    }

    pub fn extracted_at(&self) -> DateTime<Utc> {
        self.extracted_at
    }

    pub async fn load(&self, table: Table) -> Result<LoadOutcome> {
        match table.kind.write_policy() {
            WritePolicy::Append => self.append_facts(table).await,
            WritePolicy::Merge { key } => self.merge_dimension(table, key).await,
        }
    }

    fn stamp(&self, rows: Vec<Record>) -> Vec<WarehouseRow> {
        rows.into_iter()
            .map(|record| WarehouseRow::new(record, self.extracted_at))
            .collect()
    }

    async fn append_facts(&self, table: Table) -> Result<LoadOutcome> {
        let kind = table.kind;
        let received = table.len();

        let mut seen = match batch_date_span(&table) {
            Some((start, end)) if self.warehouse.table_exists(kind).await? => {
                self.warehouse.fingerprints_between(kind, start, end).await?
            },
            _ => HashSet::new(),
        };

        let fresh: Vec<Record> = table
            .rows
            .into_iter()
            .filter(|row| match row.get(FINGERPRINT_COLUMN).and_then(value_text) {
                Some(fingerprint) => seen.insert(fingerprint),
                None => true,
            })
            .collect();

        let outcome = LoadOutcome {
            received,
            written: fresh.len(),
            duplicates_skipped: received - fresh.len(),
        };

        if outcome.duplicates_skipped > 0 {
            debug!(table = %kind, skipped = outcome.duplicates_skipped, "Skipping stored sessions");
        }

        if !fresh.is_empty() {
            self.warehouse.append(kind, self.stamp(fresh)).await?;
        }

        info!(table = %kind, rows = outcome.written, "Appended rows");
        Ok(outcome)
    }

    async fn merge_dimension(&self, table: Table, key: &str) -> Result<LoadOutcome> {
        let kind = table.kind;
        let received = table.len();

        let existing = if self.warehouse.table_exists(kind).await? {
            self.warehouse.read_rows(kind).await?
        } else {
            Vec::new()
        };

        let mut combined = existing;
        combined.extend(self.stamp(table.rows));
        let merged = keep_last_per_key(combined, key);

        let outcome = LoadOutcome {
            received,
            written: merged.len(),
            duplicates_skipped: 0,
        };

        self.warehouse.replace(kind, merged).await?;

        info!(table = %kind, rows = outcome.written, "Replaced table");
        Ok(outcome)
    }
}

/// Earliest and latest session date in a fact batch
fn batch_date_span(table: &Table) -> Option<(NaiveDate, NaiveDate)> {
    let column = table.kind.date_column()?;

    table
        .rows
        .iter()
        .filter_map(|row| row.get(column)?.as_str())
        .filter_map(|s| ccp_common::types::parse_iso_date(s).ok())
        .fold(None, |span, date| match span {
            None => Some((date, date)),
            Some((start, end)) => Some((start.min(date), end.max(date))),
        })
}

/// Keep the last row for every key, preserving the order of the survivors
///
/// Rows without a key, or with a null key, form a single group.
fn keep_last_per_key(rows: Vec<WarehouseRow>, key: &str) -> Vec<WarehouseRow> {
    let mut last_index: HashMap<Option<String>, usize> = HashMap::new();
    for (index, row) in rows.iter().enumerate() {
        last_index.insert(row.text(key), index);
    }

    rows.into_iter()
        .enumerate()
        .filter(|(index, row)| last_index.get(&row.text(key)) == Some(index))
        .map(|(_, row)| row)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn row(value: Value) -> WarehouseRow {
        WarehouseRow::new(record(value), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_keep_last_per_key() {
        let rows = vec![
            row(json!({"username": "91234", "v": 1})),
            row(json!({"username": "55555", "v": 1})),
            row(json!({"username": "91234", "v": 2})),
            row(json!({"username": "99999", "v": 1})),
        ];

        let merged = keep_last_per_key(rows, "username");
        let summary: Vec<(String, i64)> = merged
            .iter()
            .map(|r| (r.text("username").unwrap(), r.record["v"].as_i64().unwrap()))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("55555".to_string(), 1),
                ("91234".to_string(), 2),
                ("99999".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_null_keys_form_one_group() {
        let rows = vec![
            row(json!({"username": null, "v": 1})),
            row(json!({"v": 2})),
        ];
        let merged = keep_last_per_key(rows, "username");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].record["v"], json!(2));
    }

    #[test]
    fn test_batch_date_span() {
        let table = Table {
            kind: TableKind::PatientTrainingSessions,
            rows: vec![
                record(json!({"date_of_session": "2024-03-05"})),
                record(json!({"date_of_session": "2024-02-28"})),
                record(json!({"date_of_session": null})),
            ],
        };
        let (start, end) = batch_date_span(&table).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 28).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_row_serializes_flat() {
        let row = row(json!({"username": "91234"}));
        let value = serde_json::to_value(&row).unwrap();

        assert_eq!(value["username"], json!("91234"));
        assert_eq!(value["_extracted_at"], json!("2024-01-01T00:00:00Z"));
        assert!(value["_extracted_uuid"].is_string());

        let back: WarehouseRow = serde_json::from_value(value).unwrap();
        assert_eq!(back, row);
    }

    #[tokio::test]
    async fn test_loaded_rows_share_run_time_and_get_own_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = LocalWarehouse::new(dir.path());
        let loader = WarehouseLoader::new(&warehouse);

        let sessions = Table {
            kind: TableKind::PatientTrainingSessions,
            rows: (1..=4)
                .map(|day| {
                    record(json!({
                        "date_of_session": format!("2024-03-0{}", day),
                        "md5": format!("fingerprint-{}", day),
                    }))
                })
                .collect(),
        };
        let nurses = Table {
            kind: TableKind::Nurses,
            rows: vec![
                record(json!({"username": "91234"})),
                record(json!({"username": "99999"})),
                record(json!({"username": "55555"})),
            ],
        };

        loader.load(sessions).await.unwrap();
        loader.load(nurses).await.unwrap();

        for kind in [TableKind::PatientTrainingSessions, TableKind::Nurses] {
            let rows = warehouse.read_rows(kind).await.unwrap();
            assert!(rows.len() >= 3);

            let uuids: HashSet<Uuid> = rows.iter().map(|r| r.extracted_uuid).collect();
            assert_eq!(uuids.len(), rows.len(), "{} reuses an _extracted_uuid", kind);
            assert!(rows.iter().all(|r| r.extracted_at == loader.extracted_at()));
        }
    }

    #[test]
    fn test_extracted_at_is_truncated_to_seconds() {
        let warehouse = LocalWarehouse::new(std::env::temp_dir());
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 15).unwrap()
            + chrono::Duration::milliseconds(750);
        let loader = WarehouseLoader::with_extracted_at(&warehouse, at);
        assert_eq!(
            loader.extracted_at(),
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 15).unwrap()
        );
    }
}
