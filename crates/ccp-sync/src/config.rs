//! Configuration management
//!
//! Settings are read once per run from an optional TOML file layered under
//! `CCP__`-prefixed environment variables (a `.env` file is honoured), then
//! handed to each component by reference. Nothing here is mutated after load.
//!
//! ```toml
//! environment = "prod"
//!
//! [api]
//! url = "https://example.org/api/index.php"
//! username = "reporting"
//! password = "..."
//!
//! [sync]
//! overlap_days = 30
//! ```
//!
//! The same keys can be set as `CCP__API__PASSWORD`, `CCP__SYNC__OVERLAP_DAYS`, ...

use chrono::NaiveDate;
use config::{Config, Environment as EnvSource, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "ccp-sync";

pub const DEFAULT_SOURCE_NAME: &str = "andhra_pradesh_ccp";

/// Per-request HTTP timeout.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 60;

/// Attempts per network call before a transient failure becomes fatal.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Base delay of the exponential backoff.
pub const DEFAULT_BACKOFF_MILLIS: u64 = 500;

/// Upper bound for a single backoff sleep.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 120;

/// Days re-fetched behind the warehouse high-water mark.
pub const DEFAULT_OVERLAP_DAYS: u32 = 30;

/// Earliest date the source can hold data for (first nurse training 2023-06-06).
pub const DEFAULT_HISTORY_FLOOR: &str = "2023-06-01";

/// Days fetched by a local run without date overrides.
pub const DEFAULT_LOCAL_WINDOW_DAYS: u32 = 7;

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/ccp";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

pub const DEFAULT_OUTPUT_DIR: &str = "data";

pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Deployment environment of a run; only `prod` sends failure notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl Environment {
    /// Runs on the `main` branch are production runs.
    pub fn from_ref_name(ref_name: Option<&str>) -> Self {
        match ref_name {
            Some("main") => Environment::Prod,
            _ => Environment::Dev,
        }
    }

    fn detect() -> Self {
        Self::from_ref_name(std::env::var("GITHUB_REF_NAME").ok().as_deref())
    }

    pub fn is_prod(self) -> bool {
        self == Environment::Prod
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Dev => write!(f, "dev"),
            Environment::Prod => write!(f, "prod"),
        }
    }
}

/// Top-level configuration for one sync run
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "Environment::detect")]
    pub environment: Environment,

    /// Name used in notifications and logs
    #[serde(default = "default_source_name")]
    pub source_name: String,

    pub api: ApiConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Remote API credentials
#[derive(Clone, Deserialize)]
pub struct ApiConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Backoff policy for transient transport failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_millis: u64,
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_millis: DEFAULT_BACKOFF_MILLIS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
        }
    }
}

impl RetryConfig {
    /// Sleep before retry number `attempt` (1-based): `base * 2^(attempt - 1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = Duration::from_millis(self.backoff_millis.saturating_mul(factor));
        delay.min(Duration::from_secs(self.max_backoff_secs))
    }
}

/// Watermark and fan-out settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub overlap_days: u32,
    pub history_floor: NaiveDate,
    pub local_window_days: u32,
    /// Concurrent requests per batch; sized to the host when unset
    pub concurrency: Option<usize>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            overlap_days: DEFAULT_OVERLAP_DAYS,
            history_floor: default_history_floor(),
            local_window_days: DEFAULT_LOCAL_WINDOW_DAYS,
            concurrency: None,
        }
    }
}

/// Postgres warehouse connection
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Connection strings may embed a password.
        let url = match self.url.split_once('@') {
            Some((_, host)) => format!("<redacted>@{}", host),
            None => self.url.clone(),
        };
        f.debug_struct("DatabaseConfig")
            .field("url", &url)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Local JSON-lines destination
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub output_dir: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

/// Failure notification target
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub slack_channel_id: Option<String>,
    pub slack_token: Option<String>,
    pub slack_api_url: String,
    /// Link to the CI run log, appended to failure messages
    pub run_url: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            slack_channel_id: None,
            slack_token: None,
            slack_api_url: DEFAULT_SLACK_API_URL.to_string(),
            run_url: std::env::var("RUN_URL").ok(),
        }
    }
}

impl std::fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("slack_channel_id", &self.slack_channel_id)
            .field("slack_token", &self.slack_token.as_ref().map(|_| "<redacted>"))
            .field("slack_api_url", &self.slack_api_url)
            .field("run_url", &self.run_url)
            .finish()
    }
}

impl SyncConfig {
    /// Load configuration from an optional file plus the environment
    ///
    /// With `path = None`, `ccp-sync.{toml,yaml,json}` in the working directory is
    /// used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                EnvSource::with_prefix("CCP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: SyncConfig = config.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.url.trim().is_empty() {
            return Err(SyncError::config("API URL cannot be empty"));
        }

        if self.api.username.is_empty() || self.api.password.is_empty() {
            return Err(SyncError::config("API username and password must be set"));
        }

        if self.api.timeout_secs == 0 {
            return Err(SyncError::config("API timeout must be greater than 0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(SyncError::config("retry.max_attempts must be at least 1"));
        }

        if self.sync.overlap_days == 0 {
            return Err(SyncError::config("sync.overlap_days must be at least 1"));
        }

        if self.sync.concurrency == Some(0) {
            return Err(SyncError::config("sync.concurrency must be at least 1"));
        }

        if self.environment.is_prod()
            && (self.notifications.slack_channel_id.is_none()
                || self.notifications.slack_token.is_none())
        {
            tracing::warn!("Production run without Slack settings; failures will only be logged");
        }

        Ok(())
    }
}

fn default_source_name() -> String {
    DEFAULT_SOURCE_NAME.to_string()
}

fn default_api_timeout_secs() -> u64 {
    DEFAULT_API_TIMEOUT_SECS
}

fn default_history_floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 6, 1).unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_environment_from_ref_name() {
        assert_eq!(Environment::from_ref_name(Some("main")), Environment::Prod);
        assert_eq!(Environment::from_ref_name(Some("feature/x")), Environment::Dev);
        assert_eq!(Environment::from_ref_name(None), Environment::Dev);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            backoff_millis: 500,
            max_backoff_secs: 3,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(500));
        assert_eq!(retry.backoff(2), Duration::from_millis(1000));
        assert_eq!(retry.backoff(3), Duration::from_millis(2000));
        assert_eq!(retry.backoff(4), Duration::from_secs(3));
        assert_eq!(retry.backoff(64), Duration::from_secs(3));
    }

    #[test]
    fn test_default_history_floor() {
        assert_eq!(
            SyncSettings::default().history_floor,
            NaiveDate::parse_from_str(DEFAULT_HISTORY_FLOOR, "%Y-%m-%d").unwrap()
        );
    }

    #[test]
    #[serial]
    fn test_load_from_file_with_defaults() {
        let file = write_config(
            r#"
environment = "prod"

[api]
url = "http://localhost:9000/api"
username = "reporter"
password = "secret"

[sync]
overlap_days = 10
"#,
        );

        let config = SyncConfig::load(Some(file.path())).unwrap();
        assert!(config.environment.is_prod());
        assert_eq!(config.source_name, DEFAULT_SOURCE_NAME);
        assert_eq!(config.api.username, "reporter");
        assert_eq!(config.api.timeout_secs, DEFAULT_API_TIMEOUT_SECS);
        assert_eq!(config.sync.overlap_days, 10);
        assert_eq!(config.sync.local_window_days, DEFAULT_LOCAL_WINDOW_DAYS);
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    #[serial]
    fn test_environment_variables_override_file() {
        let file = write_config(
            r#"
[api]
url = "http://localhost:9000/api"
username = "reporter"
password = "from-file"
"#,
        );

        std::env::set_var("CCP__API__PASSWORD", "from-env");
        let config = SyncConfig::load(Some(file.path()));
        std::env::remove_var("CCP__API__PASSWORD");

        assert_eq!(config.unwrap().api.password, "from-env");
    }

    #[test]
    #[serial]
    fn test_zero_overlap_rejected() {
        let file = write_config(
            r#"
[api]
url = "http://localhost:9000/api"
username = "reporter"
password = "secret"

[sync]
overlap_days = 0
"#,
        );

        let err = SyncConfig::load(Some(file.path())).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let api = ApiConfig::new("http://x", "user", "hunter2");
        assert!(!format!("{:?}", api).contains("hunter2"));

        let db = DatabaseConfig {
            url: "postgresql://ccp:hunter2@db:5432/ccp".to_string(),
            max_connections: 1,
        };
        let rendered = format!("{:?}", db);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("db:5432/ccp"));
    }
}
