//! SheetSync Cache - Shared cache store
//!
//! Holds transformed domain data under colon-delimited cache keys, in one of
//! two entry forms:
//! - TTL entries, valid while `now - timestamp <= ttl`
//! - Version entries, valid by source version with an optional TTL fallback
//!
//! ## Architecture
//!
//! [`CacheStore`] owns the expiry and merge rules and talks to an
//! `ICacheBackend` port from `sheetsync-core`. Two driven adapters implement
//! the port:
//!
//! - [`SqliteCacheBackend`] - the shared document database (one JSON document per key)
//! - [`MemoryCacheBackend`] - process-local map for tests and ephemeral runs
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use sheetsync_cache::{CacheStore, DatabasePool, SqliteCacheBackend};
//! use sheetsync_core::domain::CacheKey;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/sheetsync/cache.db")).await?;
//! let store = CacheStore::new(Arc::new(SqliteCacheBackend::new(pool.pool().clone())));
//! let key = CacheKey::new("sheet:positions")?;
//! let rows: Option<Vec<serde_json::Value>> = store.get(&key).await;
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod pool;
pub mod sqlite;
pub mod store;

pub use memory::MemoryCacheBackend;
pub use pool::DatabasePool;
pub use sqlite::SqliteCacheBackend;
pub use store::{CacheStore, DeltaView};

use sheetsync_core::ports::CacheBackendError;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The store refused the operation for this client
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Storage quota or size limit reached
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization or deserialization of cached data failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl From<CacheBackendError> for CacheError {
    fn from(e: CacheBackendError) -> Self {
        match e {
            CacheBackendError::PermissionDenied(msg) => CacheError::PermissionDenied(msg),
            CacheBackendError::QuotaExceeded(msg) => CacheError::QuotaExceeded(msg),
            CacheBackendError::Serialization(msg) => CacheError::Serialization(msg),
            CacheBackendError::Unavailable(msg) => CacheError::Backend(msg),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}
