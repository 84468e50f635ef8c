//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! identifier validation and decoding of wire payloads into tables.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid cache key format
    #[error("Invalid cache key: {0}")]
    InvalidCacheKey(String),

    /// Invalid sheet name
    #[error("Invalid sheet name: {0}")]
    InvalidSheetName(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// The payload did not match any known wire shape
    #[error("Unrecognized payload: {0}")]
    UnrecognizedPayload(String),

    /// The source answered with an explicit failure envelope (`ok: false`)
    #[error("Source rejected request: {0}")]
    SourceRejected(String),

    /// A cell held a value outside the scalar union (string | number | empty)
    #[error("Invalid cell value at row {row}, column {column}: {reason}")]
    InvalidCell {
        /// Zero-based data row index
        row: usize,
        /// Column index
        column: usize,
        /// What was wrong
        reason: String,
    },

    /// The table had no header row or no data rows
    #[error("Empty table: {0}")]
    EmptyTable(String),
}
