//! JSON-lines warehouse on the local filesystem
//!
//! Each table is one `<table>.jsonl` file in the output directory, one row per
//! line. File I/O runs on the blocking pool.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{value_text, Warehouse, WarehouseRow};
use crate::error::{Result, SyncError};
use crate::normalize::{TableKind, FINGERPRINT_COLUMN};

#[derive(Debug, Clone)]
pub struct LocalWarehouse {
    dir: PathBuf,
}

impl LocalWarehouse {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn table_path(&self, table: TableKind) -> PathBuf {
        self.dir.join(format!("{}.jsonl", table.name()))
    }

    async fn load(&self, table: TableKind) -> Result<Vec<WarehouseRow>> {
        let path = self.table_path(table);
        blocking(move || read_table(&path)).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::warehouse(format!("local warehouse task failed: {}", e)))?
}

fn read_table(path: &Path) -> Result<Vec<WarehouseRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let rows = serde_jsonlines::json_lines(path)?.collect::<std::io::Result<Vec<WarehouseRow>>>()?;
    Ok(rows)
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn table_exists(&self, table: TableKind) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.table_path(table)).await?)
    }

    async fn max_value(&self, table: TableKind, column: &str) -> Result<Option<String>> {
        let rows = self.load(table).await?;
        Ok(rows.iter().filter_map(|row| row.text(column)).max())
    }

    async fn distinct_values(&self, table: TableKind, column: &str) -> Result<Vec<String>> {
        let rows = self.load(table).await?;
        let values: BTreeSet<String> = rows.iter().filter_map(|row| row.text(column)).collect();
        Ok(values.into_iter().collect())
    }

    async fn read_rows(&self, table: TableKind) -> Result<Vec<WarehouseRow>> {
        self.load(table).await
    }

    async fn fingerprints_between(
        &self,
        table: TableKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashSet<String>> {
        let Some(date_column) = table.date_column() else {
            return Ok(HashSet::new());
        };

        let (start, end) = (start.to_string(), end.to_string());
        let rows = self.load(table).await?;

        Ok(rows
            .iter()
            .filter(|row| {
                row.text(date_column)
                    .is_some_and(|date| date >= start && date <= end)
            })
            .filter_map(|row| row.record.get(FINGERPRINT_COLUMN).and_then(value_text))
            .collect())
    }

    async fn append(&self, table: TableKind, rows: Vec<WarehouseRow>) -> Result<()> {
        let dir = self.dir.clone();
        let path = self.table_path(table);
        debug!(table = %table, rows = rows.len(), path = %path.display(), "Appending JSON lines");

        blocking(move || {
            std::fs::create_dir_all(&dir)?;
            serde_jsonlines::append_json_lines(&path, &rows)?;
            Ok(())
        })
        .await
    }

    async fn replace(&self, table: TableKind, rows: Vec<WarehouseRow>) -> Result<()> {
        let dir = self.dir.clone();
        let path = self.table_path(table);
        let staging = path.with_extension("jsonl.tmp");
        debug!(table = %table, rows = rows.len(), path = %path.display(), "Replacing JSON lines");

        blocking(move || {
            std::fs::create_dir_all(&dir)?;
            serde_jsonlines::write_json_lines(&staging, &rows)?;
            std::fs::rename(&staging, &path)?;
            Ok(())
        })
        .await
    }
}
