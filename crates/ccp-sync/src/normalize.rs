//! Record normalization
//!
//! Raw API records are shaped into one [`Table`] per entity kind. Each kind has a
//! fixed schema naming the columns that need coercion:
//!
//! | table                       | integer columns                                          | date column          | nested columns                   |
//! |-----------------------------|----------------------------------------------------------|----------------------|----------------------------------|
//! | `patient_training_sessions` | `mothers_trained`, `family_members_trained`, `total_trained` | `date_of_session`    | `data1`                          |
//! | `nurse_training_sessions`   | `totalmaster_trainer`, `total_trainees`                  | `sessiondateandtime` | `trainerdata1`, `traineesdata1`  |
//! | `nurses`                    |                                                          |                      |                                  |
//!
//! `nurses.user_created_dateandtime` is a timestamp column. Session tables carry an
//! `md5` fingerprint computed over the raw record before any coercion.

use ccp_common::checksum::{canonical_json, content_md5};
use ccp_common::types::{API_DATE_FORMAT, ISO_DATE_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

use crate::api::Record;
use crate::error::{Result, SyncError};

/// Column holding the content fingerprint of a session record
pub const FINGERPRINT_COLUMN: &str = "md5";

const API_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ISO_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// How a table is written to the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Immutable facts, appended and deduplicated by fingerprint
    Append,
    /// Mutable dimension rows, merged by key with the latest row winning
    Merge { key: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    PatientTrainingSessions,
    NurseTrainingSessions,
    Nurses,
}

impl TableKind {
    pub fn name(self) -> &'static str {
        match self {
            TableKind::PatientTrainingSessions => "patient_training_sessions",
            TableKind::NurseTrainingSessions => "nurse_training_sessions",
            TableKind::Nurses => "nurses",
        }
    }

    pub fn write_policy(self) -> WritePolicy {
        match self {
            TableKind::PatientTrainingSessions | TableKind::NurseTrainingSessions => {
                WritePolicy::Append
            },
            TableKind::Nurses => WritePolicy::Merge { key: "username" },
        }
    }

    /// Session date column of a fact table
    pub fn date_column(self) -> Option<&'static str> {
        match self {
            TableKind::PatientTrainingSessions => Some("date_of_session"),
            TableKind::NurseTrainingSessions => Some("sessiondateandtime"),
            TableKind::Nurses => None,
        }
    }

    fn integer_columns(self) -> &'static [&'static str] {
        match self {
            TableKind::PatientTrainingSessions => {
                &["mothers_trained", "family_members_trained", "total_trained"]
            },
            TableKind::NurseTrainingSessions => &["totalmaster_trainer", "total_trainees"],
            TableKind::Nurses => &[],
        }
    }

    fn datetime_columns(self) -> &'static [&'static str] {
        match self {
            TableKind::Nurses => &["user_created_dateandtime"],
            _ => &[],
        }
    }

    fn nested_columns(self) -> &'static [&'static str] {
        match self {
            TableKind::PatientTrainingSessions => &["data1"],
            TableKind::NurseTrainingSessions => &["trainerdata1", "traineesdata1"],
            TableKind::Nurses => &[],
        }
    }

    fn fingerprinted(self) -> bool {
        self.write_policy() == WritePolicy::Append
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized rows of one entity kind
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub kind: TableKind,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Shape raw records into a table; `None` when there are no records
pub fn normalize(kind: TableKind, records: Vec<Record>) -> Result<Option<Table>> {
    if records.is_empty() {
        return Ok(None);
    }

    let rows = records
        .into_iter()
        .map(|record| normalize_record(kind, record))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Table { kind, rows }))
}

fn normalize_record(kind: TableKind, mut record: Record) -> Result<Record> {
    if kind.fingerprinted() {
        let fingerprint = content_md5(&Value::Object(record.clone()));
        record.insert(FINGERPRINT_COLUMN.to_string(), Value::String(fingerprint));
    }

    for &column in kind.integer_columns() {
        coerce(kind, &mut record, column, coerce_integer)?;
    }

    if let Some(column) = kind.date_column() {
        coerce(kind, &mut record, column, coerce_date)?;
    }

    for &column in kind.datetime_columns() {
        coerce(kind, &mut record, column, coerce_datetime)?;
    }

    for &column in kind.nested_columns() {
        coerce(kind, &mut record, column, |value| Ok(nested_to_string(value)))?;
    }

    Ok(record)
}

fn coerce(
    kind: TableKind,
    record: &mut Record,
    column: &str,
    f: impl Fn(Value) -> std::result::Result<Value, String>,
) -> Result<()> {
    let Some(value) = record.remove(column) else {
        return Ok(());
    };

    let coerced = f(value).map_err(|message| SyncError::Normalize {
        table: kind.name(),
        column: column.to_string(),
        message,
    })?;
    record.insert(column.to_string(), coerced);

    Ok(())
}

fn coerce_integer(value: Value) -> std::result::Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Ok(Value::Number(Number::from(f as i64)))
            },
            _ => Err(format!("{} is not an integer", n)),
        },
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(Number::from(n)))
            .map_err(|_| format!("'{}' is not an integer", s)),
        other => Err(format!("{} is not an integer", other)),
    }
}

fn coerce_date(value: Value) -> std::result::Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), API_DATE_FORMAT)
            .or_else(|_| NaiveDate::parse_from_str(s.trim(), ISO_DATE_FORMAT))
            .map(|d| Value::String(d.format(ISO_DATE_FORMAT).to_string()))
            .map_err(|e| format!("'{}' is not a DD-MM-YYYY date: {}", s, e)),
        other => Err(format!("{} is not a date string", other)),
    }
}

fn coerce_datetime(value: Value) -> std::result::Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => NaiveDateTime::parse_from_str(s.trim(), API_DATETIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s.trim(), ISO_DATETIME_FORMAT))
            .map(|dt| Value::String(dt.format(ISO_DATETIME_FORMAT).to_string()))
            .map_err(|e| format!("'{}' is not a YYYY-MM-DD HH:MM:SS timestamp: {}", s, e)),
        other => Err(format!("{} is not a timestamp string", other)),
    }
}

fn nested_to_string(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(canonical_json(&value)),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn patient_session() -> Record {
        record(json!({
            "date_of_session": "05-03-2024",
            "session_conducted_by": "9100001234,9100005678",
            "mothers_trained": "4",
            "family_members_trained": "",
            "total_trained": 7,
            "data1": [{"name": "Lakshmi", "age": "24"}],
        }))
    }

    #[test]
    fn test_empty_input_yields_no_table() {
        assert!(normalize(TableKind::Nurses, Vec::new()).unwrap().is_none());
    }

    #[test]
    fn test_patient_session_coercion() {
        let table = normalize(TableKind::PatientTrainingSessions, vec![patient_session()])
            .unwrap()
            .unwrap();
        let row = &table.rows[0];

        assert_eq!(row["date_of_session"], json!("2024-03-05"));
        assert_eq!(row["mothers_trained"], json!(4));
        assert_eq!(row["family_members_trained"], Value::Null);
        assert_eq!(row["total_trained"], json!(7));
        assert_eq!(row["data1"], json!("[{\"age\": \"24\", \"name\": \"Lakshmi\"}]"));
        assert_eq!(row["session_conducted_by"], json!("9100001234,9100005678"));
    }

    #[test]
    fn test_fingerprint_is_over_raw_record() {
        let raw = patient_session();
        let expected = content_md5(&Value::Object(raw.clone()));

        let table = normalize(TableKind::PatientTrainingSessions, vec![raw])
            .unwrap()
            .unwrap();
        assert_eq!(table.rows[0][FINGERPRINT_COLUMN], json!(expected));
    }

    #[test]
    fn test_identical_records_share_fingerprint() {
        let table = normalize(
            TableKind::NurseTrainingSessions,
            vec![
                record(json!({"sessiondateandtime": "01-02-2024", "total_trainees": "3"})),
                record(json!({"total_trainees": "3", "sessiondateandtime": "01-02-2024"})),
                record(json!({"sessiondateandtime": "01-02-2024", "total_trainees": "4"})),
            ],
        )
        .unwrap()
        .unwrap();

        assert_eq!(table.rows[0]["md5"], table.rows[1]["md5"]);
        assert_ne!(table.rows[0]["md5"], table.rows[2]["md5"]);
    }

    #[test]
    fn test_absent_columns_are_skipped() {
        let table = normalize(
            TableKind::NurseTrainingSessions,
            vec![record(json!({"sessiondateandtime": "01-02-2024"}))],
        )
        .unwrap()
        .unwrap();

        let row = &table.rows[0];
        assert!(!row.contains_key("total_trainees"));
        assert!(!row.contains_key("trainerdata1"));
    }

    #[test]
    fn test_non_numeric_integer_is_fatal() {
        let err = normalize(
            TableKind::PatientTrainingSessions,
            vec![record(json!({"total_trained": "many"}))],
        )
        .unwrap_err();

        match err {
            SyncError::Normalize { table, column, .. } => {
                assert_eq!(table, "patient_training_sessions");
                assert_eq!(column, "total_trained");
            },
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_bad_date_is_fatal() {
        let err = normalize(
            TableKind::PatientTrainingSessions,
            vec![record(json!({"date_of_session": "31-31-2024"}))],
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Normalize { .. }));
    }

    #[test]
    fn test_nurse_timestamp_and_no_fingerprint() {
        let table = normalize(
            TableKind::Nurses,
            vec![record(json!({
                "username": "9100001234",
                "user_created_dateandtime": "2023-07-01 09:15:00",
            }))],
        )
        .unwrap()
        .unwrap();

        let row = &table.rows[0];
        assert_eq!(row["user_created_dateandtime"], json!("2023-07-01T09:15:00"));
        assert!(!row.contains_key(FINGERPRINT_COLUMN));
    }

    #[test]
    fn test_table_metadata() {
        assert_eq!(
            TableKind::Nurses.write_policy(),
            WritePolicy::Merge { key: "username" }
        );
        assert_eq!(
            TableKind::PatientTrainingSessions.date_column(),
            Some("date_of_session")
        );
        assert_eq!(TableKind::NurseTrainingSessions.to_string(), "nurse_training_sessions");
    }
}
