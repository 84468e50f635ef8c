//! SheetSync Transport - Tiered access to the remote tabular source
//!
//! Provides async clients for:
//! - The fast structured endpoint (snapshots and change sets)
//! - The legacy raw-text export, reached through an ordered list of routes
//! - Timed exchanges with exponential-backoff retry and error classification
//!
//! ## Modules
//!
//! - [`client`] - HTTP client with per-attempt deadlines and retry
//! - [`api`] - Structured endpoint: direct GET or authenticated intermediary POST
//! - [`export`] - Raw-text export over proxy routes with failure reasons
//! - [`parse`] - Delimited-text parsing and payload validation

pub mod api;
pub mod client;
pub mod export;
pub mod parse;

pub use api::SheetApi;
pub use client::{RetryPolicy, TransportClient};
pub use export::{ExportFetch, ExportRoutes, RouteFailure, RouteFailureReason};

use thiserror::Error;

/// Errors that can occur when talking to the remote source
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport is not configured well enough to make the call
    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    /// Credentials were rejected (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request was refused (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The endpoint or sheet does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The source quota is exhausted (429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A server-side error occurred (5xx)
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Any other non-success status
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// The per-attempt deadline elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Connection, DNS or TLS failure
    #[error("Network error: {0}")]
    Network(String),

    /// The response body could not be used
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl TransportError {
    /// Whether a retry of the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::RateLimited(_)
                | TransportError::ServerError { .. }
                | TransportError::Timeout(_)
                | TransportError::Network(_)
        )
    }

    /// Actionable hint for the person operating the system
    pub fn remediation(&self) -> &'static str {
        match self {
            TransportError::Misconfigured(_) => {
                "Check the api and fallback sections of the configuration file"
            }
            TransportError::Unauthorized(_) => {
                "Check the configured access token and that the intermediary accepts it"
            }
            TransportError::Forbidden(_) => {
                "Make sure the sheet is shared publicly or reachable through a proxy route"
            }
            TransportError::NotFound(_) => {
                "Verify the endpoint deployment URL and that the sheet name exists"
            }
            TransportError::RateLimited(_) => "The source quota is exhausted; retry later",
            TransportError::ServerError { .. } => {
                "The source is failing; retry later or configure the fast endpoint"
            }
            TransportError::UnexpectedStatus { .. } => "Check the request parameters and endpoint",
            TransportError::Timeout(_) => "Check network connectivity or raise the timeout",
            TransportError::Network(_) => "Check network connectivity",
            TransportError::InvalidPayload(_) => {
                "Check that the sheet has a header row and that the endpoint returns data"
            }
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Misconfigured(_) => "misconfigured",
            TransportError::Unauthorized(_) => "unauthorized",
            TransportError::Forbidden(_) => "forbidden",
            TransportError::NotFound(_) => "not_found",
            TransportError::RateLimited(_) => "rate_limited",
            TransportError::ServerError { .. } => "server_error",
            TransportError::UnexpectedStatus { .. } => "unexpected_status",
            TransportError::Timeout(_) => "timeout",
            TransportError::Network(_) => "network",
            TransportError::InvalidPayload(_) => "invalid_payload",
        }
    }
}
