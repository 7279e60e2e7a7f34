//! Wire types for the reporting API
//!
//! Every call is a GET to a single URL with a JSON body of the form
//! `{<operation-flag>: true, ...}`. Every response is an envelope
//! `{"result": "success" | "failed", "data": [...], "error": "..."}`; a login
//! response carries the session token under `Auth-Key`.

use ccp_common::types::{mask_identifier, API_DATE_FORMAT};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// One raw record as returned by the API
pub type Record = serde_json::Map<String, Value>;

/// Header carrying the session token
pub const AUTH_KEY_HEADER: &str = "Auth-Key";

/// Header carrying the account the token belongs to
pub const USERNAME_HEADER: &str = "Username";

/// Error strings the server uses for an invalid or expired session token
pub const TOKEN_EXPIRED_ERRORS: [&str; 2] = ["Invalid or token expired", "Expired token"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiResult {
    Success,
    Failed,
    /// Any other result string; treated like `failed` when reading data
    #[serde(other)]
    Unknown,
}

/// Response envelope shared by all operations
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub result: ApiResult,

    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default)]
    pub error: Option<Value>,

    #[serde(rename = "Auth-Key", default)]
    pub auth_key: Option<String>,
}

impl ApiEnvelope {
    /// Whether the server rejected the request because of the session token
    pub fn is_token_expired(&self) -> bool {
        self.result == ApiResult::Failed
            && self
                .error
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|e| TOKEN_EXPIRED_ERRORS.contains(&e))
    }

    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "no error message".to_string(),
        }
    }

    /// Records carried by the envelope
    ///
    /// Anything but `success` is "no data for this unit" and yields an empty list.
    pub fn into_records(self) -> Result<Vec<Record>> {
        if self.result != ApiResult::Success {
            return Ok(Vec::new());
        }

        match self.data {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Ok(record),
                    other => Err(SyncError::MalformedResponse(format!(
                        "expected an object in data, got {}",
                        other
                    ))),
                })
                .collect(),
            Some(other) => Err(SyncError::MalformedResponse(format!(
                "expected data to be an array, got {}",
                other
            ))),
        }
    }
}

/// Body of the login call
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub login: bool,
    pub username: &'a str,
    pub password: &'a str,
}

/// A data operation supported by the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Patient-training (CCP class attendance) sessions held on a date
    PatientTraining(NaiveDate),
    /// Nurse-training sessions held on a date
    NurseTraining(NaiveDate),
    /// Profile of one nurse, looked up by phone number
    NurseDetails(String),
}

impl Operation {
    pub fn flag(&self) -> &'static str {
        match self {
            Operation::PatientTraining(_) => "get_total_ccp_class_attendancedata",
            Operation::NurseTraining(_) => "get_total_nurse_training_sessiondata",
            Operation::NurseDetails(_) => "get_nurses_detailes_data",
        }
    }

    pub fn body(&self) -> Value {
        let mut body = Record::new();
        body.insert(self.flag().to_string(), Value::Bool(true));
        match self {
            Operation::PatientTraining(date) | Operation::NurseTraining(date) => {
                body.insert(
                    "date".to_string(),
                    Value::String(date.format(API_DATE_FORMAT).to_string()),
                );
            },
            Operation::NurseDetails(username) => {
                body.insert("username".to_string(), Value::String(username.clone()));
            },
        }
        Value::Object(body)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::PatientTraining(date) => write!(f, "patient training sessions for {}", date),
            Operation::NurseTraining(date) => write!(f, "nurse training sessions for {}", date),
            Operation::NurseDetails(username) => {
                write!(f, "nurse details for {}", mask_identifier(username))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> ApiEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_expired_token_detection() {
        assert!(envelope(json!({"result": "failed", "error": "Expired token"})).is_token_expired());
        assert!(envelope(json!({"result": "failed", "error": "Invalid or token expired"}))
            .is_token_expired());
        assert!(!envelope(json!({"result": "failed", "error": "No data found"})).is_token_expired());
        assert!(!envelope(json!({"result": "success", "error": "Expired token"})).is_token_expired());
    }

    #[test]
    fn test_failed_result_yields_no_records() {
        let records = envelope(json!({"result": "failed", "error": "No data found"}))
            .into_records()
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_unrecognized_result_yields_no_records() {
        let env = envelope(json!({"result": "pending", "data": [{"a": 1}]}));
        assert_eq!(env.result, ApiResult::Unknown);
        assert!(!env.is_token_expired());
        assert!(env.into_records().unwrap().is_empty());
    }

    #[test]
    fn test_success_records() {
        let records = envelope(json!({"result": "success", "data": [{"a": 1}, {"a": 2}]}))
            .into_records()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["a"], json!(2));

        let none = envelope(json!({"result": "success"})).into_records().unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_non_array_data_is_malformed() {
        let err = envelope(json!({"result": "success", "data": "oops"}))
            .into_records()
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse(_)));
    }

    #[test]
    fn test_login_response_token() {
        let env = envelope(json!({"result": "success", "Auth-Key": "abc"}));
        assert_eq!(env.auth_key.as_deref(), Some("abc"));
    }

    #[test]
    fn test_operation_bodies() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(
            Operation::PatientTraining(date).body(),
            json!({"get_total_ccp_class_attendancedata": true, "date": "05-03-2024"})
        );
        assert_eq!(
            Operation::NurseTraining(date).body(),
            json!({"get_total_nurse_training_sessiondata": true, "date": "05-03-2024"})
        );
        assert_eq!(
            Operation::NurseDetails("9100001234".into()).body(),
            json!({"get_nurses_detailes_data": true, "username": "9100001234"})
        );
    }

    #[test]
    fn test_operation_display_masks_phone() {
        let op = Operation::NurseDetails("9100001234".into());
        assert_eq!(op.to_string(), "nurse details for ***1234");
    }
}
