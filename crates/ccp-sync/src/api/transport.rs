//! HTTP transport with retry for the reporting API

use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::error::Error as _;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::ApiEnvelope;
use crate::config::RetryConfig;
use crate::error::{Result, SyncError};

/// Status codes treated as transient
const TRANSIENT_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 512;

enum Attempt {
    Done(ApiEnvelope),
    Transient(String),
}

/// Sends envelope requests and retries transient failures with exponential backoff
#[derive(Clone)]
pub struct RetryingTransport {
    client: Client,
    retry: RetryConfig,
}

impl RetryingTransport {
    pub fn new(timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ccp-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, retry })
    }

    /// GET `url` with a JSON body and decode the response envelope
    ///
    /// Connection failures (refused, reset, closed before or while sending the
    /// response), timeouts and 500/502/503/504 are retried up to
    /// `max_attempts` times. Any other non-success status is fatal unless its
    /// body is itself an envelope reporting an expired token, which is handed
    /// back so the caller can re-login.
    pub async fn get_envelope(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<ApiEnvelope> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.send_once(url, headers, body).await? {
                Attempt::Done(envelope) => return Ok(envelope),
                Attempt::Transient(message) => {
                    warn!("Request attempt {}/{} failed: {}", attempt, max_attempts, message);
                    last_error = message;

                    if attempt < max_attempts {
                        let delay = self.retry.backoff(attempt);
                        info!("Retrying in {:?}...", delay);
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(SyncError::RetriesExhausted {
            attempts: max_attempts,
            message: last_error,
        })
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<Attempt> {
        let mut request = self.client.get(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if is_connection_error(&e) => {
                return Ok(Attempt::Transient(error_chain(&e)));
            },
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if TRANSIENT_STATUSES.contains(&status) {
            return Ok(Attempt::Transient(format!("HTTP {}", status)));
        }

        // A body cut short by the server is retried like a dropped connection
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return Ok(Attempt::Transient(error_chain(&e))),
        };

        if !status.is_success() {
            if let Ok(envelope) = serde_json::from_str::<ApiEnvelope>(&text) {
                if envelope.is_token_expired() {
                    debug!("HTTP {} carries an expired-token envelope", status);
                    return Ok(Attempt::Done(envelope));
                }
            }
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                body: truncate(&text, MAX_ERROR_BODY),
            });
        }

        serde_json::from_str::<ApiEnvelope>(&text)
            .map(Attempt::Done)
            .map_err(|e| {
                SyncError::MalformedResponse(format!(
                    "{}: {}",
                    e,
                    truncate(&text, MAX_ERROR_BODY)
                ))
            })
    }
}

/// Failures of the exchange itself, as opposed to a malformed request
fn is_connection_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body()
}

/// Error message including its sources, e.g. the hyper cause of a request error
fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("ššššš", 2), "šš...");
    }
}
