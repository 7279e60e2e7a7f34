//! Failure notification
//!
//! A failed production run posts one message through a [`FailureReporter`].
//! Reporting never replaces the run's error: a reporter failure is logged and
//! the original error is handed back to the caller.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::config::{Environment, NotificationConfig};
use crate::error::{Result, SyncError};

const SLACK_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait FailureReporter: Send + Sync {
    async fn report(&self, message: &str) -> Result<()>;
}

/// Message posted when a sync fails
pub fn failure_message(source_name: &str, err: &SyncError, run_url: Option<&str>) -> String {
    let mut message = format!(
        ":warning: Sync for {} failed with the following error:\n\n`{}`",
        source_name, err
    );
    if let Some(url) = run_url {
        message.push_str(&format!("\n\n<{}|View run log>", url));
    }
    message
}

/// Notify about a failed run when running in production, then return the error
pub async fn report_failure(
    environment: Environment,
    reporter: Option<&dyn FailureReporter>,
    message: &str,
    err: SyncError,
) -> SyncError {
    if !environment.is_prod() {
        return err;
    }

    match reporter {
        Some(reporter) => match reporter.report(message).await {
            Ok(()) => info!("Failure notification sent"),
            Err(notify_err) => error!("Failed to send failure notification: {}", notify_err),
        },
        None => error!("No failure reporter configured; notification skipped"),
    }

    err
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts messages to a Slack channel with `chat.postMessage`
pub struct SlackReporter {
    client: Client,
    api_url: String,
    token: String,
    channel_id: String,
}

impl SlackReporter {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SLACK_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            channel_id: channel_id.into(),
        })
    }

    /// Reporter for the configured channel; `None` when Slack is not configured
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>> {
        match (&config.slack_token, &config.slack_channel_id) {
            (Some(token), Some(channel)) => {
                Ok(Some(Self::new(&config.slack_api_url, token, channel)?))
            },
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl FailureReporter for SlackReporter {
    async fn report(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_url))
            .bearer_auth(&self.token)
            .json(&PostMessage {
                channel: &self.channel_id,
                text: message,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: SlackResponse = response.json().await?;
        if !body.ok {
            return Err(SyncError::Notification(
                body.error.unwrap_or_else(|| "unknown Slack error".to_string()),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        messages: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl FailureReporter for RecordingReporter {
        async fn report(&self, message: &str) -> Result<()> {
            self.messages.lock().unwrap().push(message.to_string());
            if self.fail {
                return Err(SyncError::Notification("channel_not_found".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_failure_message() {
        let err = SyncError::Authentication("Invalid credentials".into());
        assert_eq!(
            failure_message("andhra_pradesh_ccp", &err, None),
            ":warning: Sync for andhra_pradesh_ccp failed with the following error:\n\n\
             `Login unsuccessful: Invalid credentials`"
        );

        let linked = failure_message("x", &err, Some("https://ci/run/1"));
        assert!(linked.ends_with("\n\n<https://ci/run/1|View run log>"));
    }

    #[tokio::test]
    async fn test_prod_failure_is_reported() {
        let reporter = RecordingReporter::default();
        let err = report_failure(
            Environment::Prod,
            Some(&reporter),
            "boom",
            SyncError::Warehouse("down".into()),
        )
        .await;

        assert!(matches!(err, SyncError::Warehouse(_)));
        assert_eq!(*reporter.messages.lock().unwrap(), vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn test_dev_failure_is_not_reported() {
        let reporter = RecordingReporter::default();
        report_failure(Environment::Dev, Some(&reporter), "boom", SyncError::config("x")).await;
        assert!(reporter.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reporter_error_keeps_original_error() {
        let reporter = RecordingReporter {
            fail: true,
            ..Default::default()
        };
        let err = report_failure(
            Environment::Prod,
            Some(&reporter),
            "boom",
            SyncError::TokenExpired { recoveries: 2 },
        )
        .await;
        assert!(matches!(err, SyncError::TokenExpired { recoveries: 2 }));
    }
}
