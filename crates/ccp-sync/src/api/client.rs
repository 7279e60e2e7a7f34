//! Authenticated client for the reporting API
//!
//! The client owns the session token. It logs in once on first use, with
//! concurrent first callers waiting on that single login, and, when the
//! server reports the token as expired, logs in again and re-issues the same
//! request. Recovery is a bounded loop: after [`MAX_TOKEN_RECOVERIES`] re-logins
//! for a single request the expiry becomes a fatal [`SyncError::TokenExpired`].
//!
//! The client is shared by concurrent fetch workers. Workers that observe an
//! expiry at the same time each re-login and the last token written wins; the
//! server accepts any freshly issued token, so no coordination is attempted.

use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::transport::RetryingTransport;
use super::types::{
    ApiEnvelope, ApiResult, LoginRequest, Operation, Record, AUTH_KEY_HEADER, USERNAME_HEADER,
};
use crate::config::{ApiConfig, RetryConfig};
use crate::error::{Result, SyncError};

/// Re-logins allowed for one request before giving up
pub const MAX_TOKEN_RECOVERIES: u32 = 2;

pub struct ApiClient {
    transport: RetryingTransport,
    url: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
    first_login: Mutex<()>,
}

impl ApiClient {
    pub fn new(api: &ApiConfig, retry: &RetryConfig) -> Result<Self> {
        let transport = RetryingTransport::new(api.timeout(), retry.clone())?;

        Ok(Self {
            transport,
            url: api.url.clone(),
            username: api.username.clone(),
            password: api.password.clone(),
            token: RwLock::new(None),
            first_login: Mutex::new(()),
        })
    }

    /// Obtain a fresh session token and install it
    pub async fn login(&self) -> Result<String> {
        let request = LoginRequest {
            login: true,
            username: &self.username,
            password: &self.password,
        };
        let body = serde_json::to_value(&request)?;

        let envelope = self.transport.get_envelope(&self.url, &[], &body).await?;
        let token = Self::token_from(envelope)?;

        *self.token.write().await = Some(token.clone());
        info!("Login successful");

        Ok(token)
    }

    fn token_from(envelope: ApiEnvelope) -> Result<String> {
        if envelope.result != ApiResult::Success {
            return Err(SyncError::Authentication(envelope.error_message()));
        }

        envelope
            .auth_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SyncError::Authentication("response carried no Auth-Key".to_string()))
    }

    async fn installed_token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn current_token(&self) -> Result<String> {
        if let Some(token) = self.installed_token().await {
            return Ok(token);
        }

        let _guard = self.first_login.lock().await;
        if let Some(token) = self.installed_token().await {
            return Ok(token);
        }

        debug!("No session token installed, logging in");
        self.login().await
    }

    /// Run one operation, recovering from token expiry
    pub async fn fetch(&self, operation: &Operation) -> Result<Vec<Record>> {
        let body: Value = operation.body();
        let mut recoveries = 0;

        loop {
            let token = self.current_token().await?;
            let headers = [
                (AUTH_KEY_HEADER, token.as_str()),
                (USERNAME_HEADER, self.username.as_str()),
            ];

            let envelope = self.transport.get_envelope(&self.url, &headers, &body).await?;

            if !envelope.is_token_expired() {
                if envelope.result != ApiResult::Success {
                    debug!("No data for {}: {}", operation, envelope.error_message());
                }
                let records = envelope.into_records()?;
                info!("Fetched {} ({} records)", operation, records.len());
                return Ok(records);
            }

            if recoveries >= MAX_TOKEN_RECOVERIES {
                return Err(SyncError::TokenExpired { recoveries });
            }
            recoveries += 1;

            warn!(
                "Token expired while fetching {}, re-login {}/{}",
                operation, recoveries, MAX_TOKEN_RECOVERIES
            );
            self.login().await?;
        }
    }

    pub async fn fetch_patient_training(&self, date: NaiveDate) -> Result<Vec<Record>> {
        self.fetch(&Operation::PatientTraining(date)).await
    }

    pub async fn fetch_nurse_training(&self, date: NaiveDate) -> Result<Vec<Record>> {
        self.fetch(&Operation::NurseTraining(date)).await
    }

    pub async fn fetch_nurse_details(&self, username: &str) -> Result<Vec<Record>> {
        self.fetch(&Operation::NurseDetails(username.to_string())).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("url", &self.url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
