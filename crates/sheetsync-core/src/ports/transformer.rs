//! Transformer port
//!
//! A transformer turns the raw rows of one fetch into domain rows. It must be
//! a pure function of its input: the transform pipeline may run it on the
//! worker thread or inline on the caller, and both runs have to produce the
//! same output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DomainRow, RawRow};

/// Context handed to a transformer alongside the rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformMeta {
    /// Logical data type being produced, e.g. `positions`
    pub data_type: String,
    /// Sheet the rows were read from
    pub sheet: String,
    /// Source version, when the transport provided one
    pub version: Option<i64>,
    /// Fetch time in Unix milliseconds
    pub fetched_at: i64,
}

/// Everything a transformer receives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformInput {
    pub rows: Vec<RawRow>,
    pub meta: TransformMeta,
    /// Extra context such as lookup tables computed from sibling fetches
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A transformer rejected its input
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransformFailure(pub String);

impl TransformFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Pure row transformation, addressable by id
pub trait Transformer: Send + Sync {
    /// Stable identifier used to route jobs to the worker-side implementation
    fn id(&self) -> &str;

    /// Columns the transformer needs; named in the error raised when a
    /// non-empty input produces no output
    fn required_columns(&self) -> Vec<String> {
        Vec::new()
    }

    /// Transform `input`, reporting percent complete (0-100) through `progress`
    fn transform(
        &self,
        input: &TransformInput,
        progress: &mut dyn FnMut(u8),
    ) -> Result<Vec<DomainRow>, TransformFailure>;
}
