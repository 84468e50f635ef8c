//! Cache backend port (driven/secondary port)
//!
//! The backing store is a document database shared by every client: one
//! document per cache key, holding either entry form. Implementations only
//! move documents; expiry and merge rules live in the cache store above.
//!
//! ## Design Notes
//!
//! - Errors are classified rather than `anyhow` because callers must tell an
//!   expected permission refusal apart from an unexpected backend failure.
//! - Writes are whole-document replacements. There is no partial update and
//!   no transaction spanning a read and a write (last writer wins).

use thiserror::Error;

use crate::domain::{CacheDocument, CacheKey};

/// Errors reported by a cache backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheBackendError {
    /// The store refused the operation for this client
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Storage quota or size limit reached
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure (connection, I/O, query)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl CacheBackendError {
    /// Permission refusals are expected for read-only clients.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CacheBackendError::PermissionDenied(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheBackendError::PermissionDenied(_) => "permission_denied",
            CacheBackendError::QuotaExceeded(_) => "quota_exceeded",
            CacheBackendError::Serialization(_) => "serialization",
            CacheBackendError::Unavailable(_) => "unavailable",
        }
    }
}

/// Port trait for the shared cache document store
#[async_trait::async_trait]
pub trait ICacheBackend: Send + Sync {
    /// Load the document stored under `key`
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheDocument>, CacheBackendError>;

    /// Replace the document stored under `key`
    async fn store(&self, key: &CacheKey, document: &CacheDocument)
        -> Result<(), CacheBackendError>;

    /// Delete the document stored under `key`; deleting a missing key is not an error
    async fn remove(&self, key: &CacheKey) -> Result<(), CacheBackendError>;

    /// Delete every document
    async fn remove_all(&self) -> Result<(), CacheBackendError>;

    /// List the stored keys
    async fn keys(&self) -> Result<Vec<CacheKey>, CacheBackendError>;
}
