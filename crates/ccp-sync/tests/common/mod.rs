//! Shared helpers for ccp-sync integration tests
//!
//! The reporting API is mocked with wiremock. Every request is a GET to `/api`
//! whose JSON body names the operation, so mocks match on `body_partial_json`.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use ccp_sync::config::{
    ApiConfig, DatabaseConfig, Environment, LocalConfig, NotificationConfig, RetryConfig,
    SyncConfig, SyncSettings, DEFAULT_SOURCE_NAME,
};
use serde_json::{json, Value};
use std::path::Path;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};

pub const API_PATH: &str = "/api";
pub const USERNAME: &str = "reporter";
pub const PASSWORD: &str = "secret";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ccp_sync=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig::new(format!("{}{}", server.uri(), API_PATH), USERNAME, PASSWORD)
}

/// Retry policy with millisecond backoff so failure tests stay fast
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        backoff_millis: 1,
        max_backoff_secs: 1,
    }
}

pub fn sync_config(server: &MockServer, output_dir: &Path) -> SyncConfig {
    SyncConfig {
        environment: Environment::Dev,
        source_name: DEFAULT_SOURCE_NAME.to_string(),
        api: api_config(server),
        retry: fast_retry(3),
        sync: SyncSettings {
            concurrency: Some(4),
            ..SyncSettings::default()
        },
        database: DatabaseConfig::default(),
        local: LocalConfig {
            output_dir: output_dir.to_path_buf(),
        },
        notifications: NotificationConfig {
            run_url: None,
            ..NotificationConfig::default()
        },
    }
}

pub fn success(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"result": "success", "data": data}))
}

pub fn no_data() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"result": "failed", "error": "No data found"}))
}

pub fn expired() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"result": "failed", "error": "Expired token"}))
}

pub fn login_ok(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"result": "success", "Auth-Key": token}))
}

/// Any call to the API endpoint
pub fn api_call() -> MockBuilder {
    Mock::given(method("GET")).and(path(API_PATH))
}

pub fn login_call() -> MockBuilder {
    api_call().and(body_partial_json(json!({"login": true, "username": USERNAME})))
}

pub fn patient_call(date: &str) -> MockBuilder {
    api_call().and(body_partial_json(
        json!({"get_total_ccp_class_attendancedata": true, "date": date}),
    ))
}

pub fn any_patient_call() -> MockBuilder {
    api_call().and(body_partial_json(json!({"get_total_ccp_class_attendancedata": true})))
}

pub fn any_nurse_training_call() -> MockBuilder {
    api_call().and(body_partial_json(json!({"get_total_nurse_training_sessiondata": true})))
}

pub fn nurse_call(username: &str) -> MockBuilder {
    api_call().and(body_partial_json(
        json!({"get_nurses_detailes_data": true, "username": username}),
    ))
}

pub fn with_token(builder: MockBuilder, token: &str) -> MockBuilder {
    builder
        .and(header("Auth-Key", token))
        .and(header("Username", USERNAME))
}

pub fn patient_session(date: &str, conducted_by: &str, total: &str) -> Value {
    json!({
        "date_of_session": date,
        "session_conducted_by": conducted_by,
        "mothers_trained": "3",
        "family_members_trained": "2",
        "total_trained": total,
        "data1": [{"name": "Lakshmi", "phone": "9000000001"}],
    })
}

pub fn nurse_profile(username: &str, name: &str) -> Value {
    json!({
        "username": username,
        "name": name,
        "user_created_dateandtime": "2023-07-01 09:15:00",
    })
}
