//! Postgres warehouse backend
//!
//! Each table stores the normalized record as JSONB next to the lineage columns:
//!
//! ```text
//! _extracted_uuid UUID PRIMARY KEY
//! _extracted_at   TIMESTAMPTZ NOT NULL
//! record          JSONB NOT NULL
//! ```
//!
//! Tables are created on first write. Table names come from [`TableKind`], never
//! from input, so they are interpolated into the SQL text directly.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Warehouse, WarehouseRow};
use crate::config::DatabaseConfig;
use crate::error::{Result, SyncError};
use crate::normalize::{TableKind, FINGERPRINT_COLUMN};

const ACQUIRE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Database connection pool created");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn create_table(tx: &mut Transaction<'_, Postgres>, table: TableKind) -> Result<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                _extracted_uuid UUID PRIMARY KEY,
                _extracted_at TIMESTAMPTZ NOT NULL,
                record JSONB NOT NULL
            )
            "#,
            table.name()
        );
        sqlx::query(&sql).execute(&mut **tx).await?;
        Ok(())
    }

    async fn insert_rows(
        tx: &mut Transaction<'_, Postgres>,
        table: TableKind,
        rows: Vec<WarehouseRow>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut uuids: Vec<Uuid> = Vec::with_capacity(rows.len());
        let mut stamps: Vec<DateTime<Utc>> = Vec::with_capacity(rows.len());
        let mut records: Vec<Value> = Vec::with_capacity(rows.len());
        for row in rows {
            uuids.push(row.extracted_uuid);
            stamps.push(row.extracted_at);
            records.push(Value::Object(row.record));
        }

        let sql = format!(
            r#"
            INSERT INTO {} (_extracted_uuid, _extracted_at, record)
            SELECT * FROM UNNEST($1::uuid[], $2::timestamptz[], $3::jsonb[])
            "#,
            table.name()
        );

        let result = sqlx::query(&sql)
            .bind(&uuids)
            .bind(&stamps)
            .bind(&records)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn table_exists(&self, table: TableKind) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(table.name())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn max_value(&self, table: TableKind, column: &str) -> Result<Option<String>> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }

        let sql = format!("SELECT MAX(record->>$1) FROM {}", table.name());
        let max: Option<String> = sqlx::query_scalar(&sql)
            .bind(column)
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }

    async fn distinct_values(&self, table: TableKind, column: &str) -> Result<Vec<String>> {
        if !self.table_exists(table).await? {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT DISTINCT record->>$1 AS value
            FROM {}
            WHERE record->>$1 IS NOT NULL
            ORDER BY value
            "#,
            table.name()
        );
        let values: Vec<String> = sqlx::query_scalar(&sql)
            .bind(column)
            .fetch_all(&self.pool)
            .await?;
        Ok(values)
    }

    async fn read_rows(&self, table: TableKind) -> Result<Vec<WarehouseRow>> {
        if !self.table_exists(table).await? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT _extracted_uuid, _extracted_at, record FROM {} ORDER BY _extracted_at",
            table.name()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                let record = match row.try_get::<Value, _>("record")? {
                    Value::Object(map) => map,
                    other => {
                        return Err(SyncError::warehouse(format!(
                            "{} holds a non-object record: {}",
                            table, other
                        )))
                    },
                };
                Ok(WarehouseRow {
                    extracted_uuid: row.try_get("_extracted_uuid")?,
                    extracted_at: row.try_get("_extracted_at")?,
                    record,
                })
            })
            .collect()
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
        if !self.table_exists(table).await? {
            return Ok(HashSet::new());
        }

        let sql = format!(
            r#"
            SELECT DISTINCT record->>$1
            FROM {}
            WHERE record->>$2 BETWEEN $3 AND $4
              AND record->>$1 IS NOT NULL
            "#,
            table.name()
        );
        let fingerprints: Vec<String> = sqlx::query_scalar(&sql)
            .bind(FINGERPRINT_COLUMN)
            .bind(date_column)
            .bind(start.to_string())
            .bind(end.to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(fingerprints.into_iter().collect())
    }

    async fn append(&self, table: TableKind, rows: Vec<WarehouseRow>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::create_table(&mut tx, table).await?;
        let inserted = Self::insert_rows(&mut tx, table, rows).await?;
        tx.commit().await?;

        debug!(table = %table, rows = inserted, "Inserted rows");
        Ok(())
    }

    async fn replace(&self, table: TableKind, rows: Vec<WarehouseRow>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::create_table(&mut tx, table).await?;

        sqlx::query(&format!("DELETE FROM {}", table.name()))
            .execute(&mut *tx)
            .await?;
        let inserted = Self::insert_rows(&mut tx, table, rows).await?;
        tx.commit().await?;

        debug!(table = %table, rows = inserted, "Replaced rows");
        Ok(())
    }
}
