//! Personnel identifiers referenced by stored sessions
//!
//! Patient-training sessions name the nurses who ran them in
//! `session_conducted_by` as a comma-joined list of phone numbers. Nurse-training
//! sessions list trainers and trainees in `trainerdata1` / `traineesdata1`, stored
//! as JSON text whose elements carry `phone_no`.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::Result;
use crate::normalize::TableKind;
use crate::warehouse::{value_text, Warehouse};

const CONDUCTED_BY_COLUMN: &str = "session_conducted_by";
const PARTICIPANT_COLUMNS: [&str; 2] = ["trainerdata1", "traineesdata1"];
const PHONE_FIELD: &str = "phone_no";

/// Sorted, unique, non-blank identifiers across both session tables
pub async fn collect_identifiers(warehouse: &dyn Warehouse) -> Result<Vec<String>> {
    let mut identifiers = BTreeSet::new();

    for value in warehouse
        .distinct_values(TableKind::PatientTrainingSessions, CONDUCTED_BY_COLUMN)
        .await?
    {
        identifiers.extend(split_conducted_by(&value));
    }

    for column in PARTICIPANT_COLUMNS {
        for value in warehouse
            .distinct_values(TableKind::NurseTrainingSessions, column)
            .await?
        {
            identifiers.extend(participant_phones(&value));
        }
    }

    debug!(count = identifiers.len(), "Collected personnel identifiers");
    Ok(identifiers.into_iter().collect())
}

fn split_conducted_by(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn participant_phones(value: &str) -> Vec<String> {
    let parsed: Value = match serde_json::from_str(value) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Skipping unparseable participant list: {}", e);
            return Vec::new();
        },
    };

    let entries = match parsed {
        Value::Array(entries) => entries,
        Value::Object(_) => vec![parsed],
        _ => return Vec::new(),
    };

    entries
        .iter()
        .filter_map(|entry| entry.get(PHONE_FIELD).and_then(value_text))
        .map(|phone| phone.trim().to_string())
        .filter(|phone| !phone.is_empty())
        .collect()
}
