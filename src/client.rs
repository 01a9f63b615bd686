//! HTTP client module for reading a function's log from the service.
//!
//! This module provides a single-request log source with connection pooling
//! and a classification of failures into transient and permanent ones. Retry
//! and backoff are the log synchronizer's business, not the client's.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::account::Credentials;
use crate::config::Config;
use crate::error::Error;
use crate::log_entry::{LogCursor, LogEntry, LogPage};

/// Header carrying the account API key.
pub const API_KEY_HEADER: &str = "X-Binaris-Api-Key";

/// Header carrying a per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Response header with the token for the next log page.
pub const NEXT_TOKEN_HEADER: &str = "x-binaris-next-token";

/// Errors that can occur during a single HTTP exchange.
#[derive(Debug)]
pub enum ClientError {
    /// No connection could be established
    Unreachable { url: String, reason: String },

    /// Server returned an error status code
    Status { code: StatusCode, message: String },

    /// Failed to parse response body
    Parse(String),

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Unreachable { url, reason } => {
                write!(f, "Cannot reach {}: {}", url, reason)
            }
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else if err.is_builder() {
            ClientError::Config(err.to_string())
        } else {
            ClientError::Unreachable {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: err.to_string(),
            }
        }
    }
}

impl ClientError {
    /// Check if an error is retryable.
    ///
    /// Retryable errors include:
    /// - Connection errors
    /// - Timeouts
    /// - Server errors (5xx)
    /// - Rate limiting (429)
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Unreachable { .. } => true,
            ClientError::Timeout => true,
            ClientError::Status { code, .. } => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
            // Non-retryable errors
            ClientError::Parse(_) => false,
            ClientError::Config(_) => false,
        }
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unreachable { url, reason } => Error::NoBackendReachable { url, reason },
            ClientError::Timeout => Error::NoBackendReachable {
                url: String::new(),
                reason: "request timed out".to_string(),
            },
            ClientError::Status { code, message } => Error::LogFetchRejected {
                status: code.as_u16(),
                message,
            },
            ClientError::Parse(reason) => Error::MalformedResponse { reason },
            ClientError::Config(reason) => Error::InvalidEnvironment {
                var: "http client".to_string(),
                reason,
            },
        }
    }
}

/// Build the shared HTTP client (reused for connection pooling).
pub fn build_http_client(timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| ClientError::Config(e.to_string()))
}

/// Anything that can answer one log poll.
///
/// Implemented by [`LogClient`] over HTTP; the synchronizer is generic over it
/// so it can be driven by scripted sources in tests.
pub trait LogSource {
    /// Fetch the page following `cursor`.
    fn fetch(
        &self,
        cursor: &LogCursor,
        follow: bool,
    ) -> impl Future<Output = Result<LogPage, ClientError>> + Send;
}

/// HTTP log source for one function.
pub struct LogClient {
    /// The underlying HTTP client
    client: Client,

    /// URL of the function's log resource
    logs_url: String,

    /// API key sent with every request
    api_key: String,
}

impl std::fmt::Debug for LogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogClient")
            .field("logs_url", &self.logs_url)
            .finish_non_exhaustive()
    }
}

impl LogClient {
    /// Create a log client for `function_name` under the given account.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(
        config: &Config,
        credentials: &Credentials,
        function_name: &str,
    ) -> Result<Self, ClientError> {
        let logs_url = logs_url(&config.log_endpoint, &credentials.account_id, function_name);
        Self::with_settings(logs_url, &credentials.api_key, config.request_timeout)
    }

    /// Create a log client against an explicit log resource URL.
    pub fn with_settings(
        logs_url: impl Into<String>,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            logs_url: logs_url.into(),
            api_key: api_key.to_string(),
        })
    }

    /// Get the configured log resource URL.
    pub fn logs_url(&self) -> &str {
        &self.logs_url
    }
}

impl LogSource for LogClient {
    async fn fetch(&self, cursor: &LogCursor, follow: bool) -> Result<LogPage, ClientError> {
        let request_id = Uuid::new_v4();
        debug!(
            url = %self.logs_url,
            request_id = %request_id,
            start_after = ?cursor.start_after,
            has_token = cursor.token.is_some(),
            follow = follow,
            "Fetching log page"
        );

        let response = self
            .client
            .get(&self.logs_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .query(&cursor.query_pairs(follow))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(
                status = status.as_u16(),
                request_id = %request_id,
                "Log endpoint returned an error"
            );
            return Err(ClientError::Status {
                code: status,
                message,
            });
        }

        let next_token = response
            .headers()
            .get(NEXT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|token| !token.is_empty())
            .map(str::to_string);

        let body = response.text().await?;
        let entries: Vec<LogEntry> =
            serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))?;

        debug!(entries = entries.len(), has_next = next_token.is_some(), "Fetched log page");
        Ok(LogPage::new(entries, next_token))
    }
}

/// `<logBase>/v1/logs/<accountId>-<function>`
pub fn logs_url(log_endpoint: &str, account_id: &str, function_name: &str) -> String {
    format!("{}/v1/logs/{}-{}", log_endpoint, account_id, function_name)
}
