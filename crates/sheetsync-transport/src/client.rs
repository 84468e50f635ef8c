//! HTTP client with per-attempt deadlines and retry
//!
//! Every exchange is one attempt bounded by its own deadline. Failed
//! attempts are classified into [`TransportError`]; retryable classes are
//! retried with exponential backoff (`base * 2^attempt`, no jitter).
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use sheetsync_transport::client::{RetryPolicy, TransportClient};
//!
//! # async fn example() -> Result<(), sheetsync_transport::TransportError> {
//! let client = TransportClient::new(RetryPolicy::default());
//! let body = client
//!     .execute_text("ping", |http| http.get("https://example.com/exec"), Duration::from_secs(30))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use sheetsync_core::config::RetryConfig;
use tracing::{debug, info, warn};

use crate::TransportError;

/// Longest error body excerpt kept in an error message
const ERROR_BODY_LIMIT: usize = 200;

// ============================================================================
// RetryPolicy
// ============================================================================

/// How often and how patiently to retry transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Single attempt, no retry
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
        )
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    /// 3 retries starting at 1 second: 1s, 2s, 4s
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

// ============================================================================
// TransportClient
// ============================================================================

/// Shared HTTP client for every tier
#[derive(Debug, Clone)]
pub struct TransportClient {
    client: Client,
    retry: RetryPolicy,
}

impl TransportClient {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            retry,
        }
    }

    /// Use an existing `reqwest::Client` (custom TLS, proxies, user agent)
    pub fn with_client(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Returns a reference to the underlying reqwest Client
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// One attempt: send, check status, read the body as text
    ///
    /// `timeout` bounds the whole attempt, including reading the body.
    pub async fn attempt_text<F>(&self, build: F, timeout: Duration) -> Result<String, TransportError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let request = build(&self.client).timeout(timeout);
        let response = request.send().await.map_err(classify_reqwest)?;
        let status = response.status();
        let url = response.url().clone();

        let body = response.text().await.map_err(classify_reqwest)?;
        if status.is_success() {
            debug!(%url, status = status.as_u16(), bytes = body.len(), "Response received");
            return Ok(body);
        }

        Err(classify_status(status, url.as_str(), &body))
    }

    /// Attempt an exchange, retrying retryable failures per the retry policy
    pub async fn execute_text<F>(
        &self,
        operation: &str,
        build: F,
        timeout: Duration,
    ) -> Result<String, TransportError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt_text(&build, timeout).await {
                Ok(body) => {
                    if attempt > 0 {
                        info!(operation, attempt, "Request succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(operation, attempts = attempt + 1, error = %err, "Retry limit exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

fn classify_reqwest(err: reqwest::Error) -> TransportError {
    let target = err
        .url()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "request".to_string());
    if err.is_timeout() {
        TransportError::Timeout(target)
    } else if err.is_builder() {
        TransportError::Misconfigured(err.to_string())
    } else if err.is_decode() {
        TransportError::InvalidPayload(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

/// Map a non-success status onto the error classes
pub(crate) fn classify_status(status: StatusCode, url: &str, body: &str) -> TransportError {
    let excerpt: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
    let message = if excerpt.is_empty() {
        url.to_string()
    } else {
        format!("{url}: {excerpt}")
    };

    match status {
        StatusCode::UNAUTHORIZED => TransportError::Unauthorized(message),
        StatusCode::FORBIDDEN => TransportError::Forbidden(message),
        StatusCode::NOT_FOUND => TransportError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited(message),
        s if s.is_server_error() => TransportError::ServerError {
            status: s.as_u16(),
            message,
        },
        s => TransportError::UnexpectedStatus {
            status: s.as_u16(),
            message,
        },
    }
}
