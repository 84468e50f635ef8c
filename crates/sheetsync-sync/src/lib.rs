//! SheetSync Sync - Fetch, transform and synchronization engines
//!
//! Provides:
//! - Tiered fetches with cache, fast endpoint and export-route fallback
//! - Version-based incremental sync against the structured endpoint
//! - An offloaded transform pipeline with inline fallback
//! - Opportunistic background synchronization when the application goes idle
//!
//! ## Modules
//!
//! - [`orchestrator`] - `FetchOrchestrator`: cache → fast endpoint → export routes
//! - [`delta`] - `DeltaSyncEngine`: snapshot, poll, apply, reload
//! - [`pipeline`] - `TransformPipeline`: worker thread, job registry, timeouts
//! - [`background`] - `BackgroundSyncCoordinator`: single-flight idle sync
//! - [`transformers`] - Built-in transformers and the `TransformerRegistry`

pub mod background;
pub mod delta;
pub mod orchestrator;
pub mod pipeline;
pub mod transformers;

pub use background::{BackgroundSyncCoordinator, BackgroundSyncReport, SheetOutcome, Visibility};
pub use delta::{ApplyOutcome, DeltaData, DeltaState, DeltaSyncEngine};
pub use orchestrator::{FetchOrchestrator, FetchRequest, FetchTier, FetchedTable};
pub use pipeline::{ProgressFn, TransformPipeline, TransformRequest};
pub use transformers::{ColumnsTransformer, RowsTransformer, TransformerRegistry};

use std::time::Duration;

use sheetsync_transport::{RouteFailure, TransportError};
use thiserror::Error;

/// Errors raised by the transform pipeline
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// The transformer rejected its input
    #[error("Transformer '{transformer}' failed: {message}")]
    Failed { transformer: String, message: String },

    /// The job did not settle in time and no fallback was supplied
    #[error("Transform job for '{transformer}' timed out after {after:?}")]
    Timeout { transformer: String, after: Duration },

    /// The worker died while the job was registered
    #[error("Transform worker crashed: {0}")]
    WorkerCrashed(String),

    /// The worker cannot run the job and no fallback was supplied
    #[error("No fallback available for transformer '{0}'")]
    NoFallback(String),

    /// No transformer is registered under this id
    #[error("Unknown transformer: {0}")]
    UnknownTransformer(String),
}

/// Errors surfaced by fetches and syncs
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every tier failed; names each route and its reason in order
    #[error(
        "{}",
        all_routes_failed_message(.data_type, .api_failure.as_deref(), .api_remediation.as_deref(), .failures)
    )]
    AllRoutesFailed {
        data_type: String,
        api_failure: Option<String>,
        /// Set when the fast endpoint refused access
        api_remediation: Option<&'static str>,
        failures: Vec<RouteFailure>,
    },

    /// The source rejected the configured credentials or access
    #[error("Unauthorized: {message}. {remediation}")]
    Unauthorized {
        message: String,
        remediation: &'static str,
    },

    /// A non-empty input produced no output rows
    #[error(
        "Transformer '{transformer}' produced no rows from {input_rows} input rows; \
         check that the sheet has the columns: {}",
        .required_columns.join(", ")
    )]
    EmptyTransform {
        transformer: String,
        input_rows: usize,
        required_columns: Vec<String>,
    },

    #[error(transparent)]
    Transform(#[from] TransformError),

    /// The data type is not declared in the configuration
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    /// A data type declaration is unusable
    #[error("Invalid data type '{data_type}': {message}")]
    InvalidDataType { data_type: String, message: String },

    #[error("Transport error: {0}. {}", .0.remediation())]
    Transport(#[from] TransportError),
}

/// Hints appended to an all-routes failure
pub const ALL_ROUTES_REMEDIATION: &str = "Check network connectivity, check that the sheet is \
     publicly reachable, configure the fast structured endpoint, or retry later";

fn all_routes_failed_message(
    data_type: &str,
    api_failure: Option<&str>,
    api_remediation: Option<&str>,
    failures: &[RouteFailure],
) -> String {
    let mut message = format!("All routes failed for '{data_type}'");
    if let Some(api) = api_failure {
        message.push_str(&format!(" (fast endpoint: {api})"));
    }
    let routes: Vec<String> = failures.iter().map(ToString::to_string).collect();
    message.push_str(": ");
    message.push_str(&routes.join("; "));
    message.push_str(". ");
    if let Some(remediation) = api_remediation {
        message.push_str(remediation);
        message.push_str(". ");
    }
    message.push_str(ALL_ROUTES_REMEDIATION);
    message
}

impl FetchError {
    /// Map a fast endpoint failure that has no fallback left, surfacing
    /// refused access as `Unauthorized`
    pub fn from_api(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized(_) | TransportError::Forbidden(_) => {
                FetchError::Unauthorized {
                    message: err.to_string(),
                    remediation: err.remediation(),
                }
            }
            other => FetchError::Transport(other),
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::AllRoutesFailed { .. } => "all_routes_failed",
            FetchError::Unauthorized { .. } => "unauthorized",
            FetchError::EmptyTransform { .. } => "empty_transform",
            FetchError::Transform(_) => "transform",
            FetchError::UnknownDataType(_) => "unknown_data_type",
            FetchError::InvalidDataType { .. } => "invalid_data_type",
            FetchError::Transport(_) => "transport",
        }
    }
}
