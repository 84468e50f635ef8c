//! SQLite implementation of ICacheBackend
//!
//! Each cache key maps to one row of `cache_documents` holding the whole
//! entry as a JSON document. The `kind` column mirrors the entry form so the
//! table can be inspected without decoding documents.
//!
//! ## Error classification
//!
//! | SQLite primary code | Backend error        |
//! |---------------------|----------------------|
//! | `SQLITE_PERM` (3)   | `PermissionDenied`   |
//! | `SQLITE_READONLY` (8) | `PermissionDenied` |
//! | `SQLITE_AUTH` (23)  | `PermissionDenied`   |
//! | `SQLITE_FULL` (13)  | `QuotaExceeded`      |
//! | anything else       | `Unavailable`        |

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use sheetsync_core::domain::{CacheDocument, CacheKey};
use sheetsync_core::ports::{CacheBackendError, ICacheBackend};

const SQLITE_PERM: i32 = 3;
const SQLITE_READONLY: i32 = 8;
const SQLITE_FULL: i32 = 13;
const SQLITE_AUTH: i32 = 23;

/// SQLite-backed shared document store
pub struct SqliteCacheBackend {
    pool: SqlitePool,
}

impl SqliteCacheBackend {
    /// Creates a new backend over the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Map an SQLx error onto the backend error classes
fn classify(e: sqlx::Error) -> CacheBackendError {
    if let sqlx::Error::Database(db_err) = &e {
        let primary = db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff);
        match primary {
            Some(SQLITE_PERM) | Some(SQLITE_READONLY) | Some(SQLITE_AUTH) => {
                return CacheBackendError::PermissionDenied(db_err.message().to_string());
            }
            Some(SQLITE_FULL) => {
                return CacheBackendError::QuotaExceeded(db_err.message().to_string());
            }
            _ => {}
        }
    }
    CacheBackendError::Unavailable(e.to_string())
}

#[async_trait]
impl ICacheBackend for SqliteCacheBackend {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheDocument>, CacheBackendError> {
        let row = sqlx::query("SELECT document FROM cache_documents WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        match row {
            Some(row) => {
                let raw: String = row.get("document");
                let document = serde_json::from_str(&raw)
                    .map_err(|e| CacheBackendError::Serialization(format!("{key}: {e}")))?;
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    async fn store(
        &self,
        key: &CacheKey,
        document: &CacheDocument,
    ) -> Result<(), CacheBackendError> {
        let raw = serde_json::to_string(document)
            .map_err(|e| CacheBackendError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO cache_documents (key, kind, document, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                kind = excluded.kind,
                document = excluded.document,
                updated_at = excluded.updated_at",
        )
        .bind(key.as_str())
        .bind(document.kind())
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheBackendError> {
        sqlx::query("DELETE FROM cache_documents WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), CacheBackendError> {
        sqlx::query("DELETE FROM cache_documents")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, CacheBackendError> {
        let rows = sqlx::query("SELECT key FROM cache_documents ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.iter()
            .map(|row| {
                let key: String = row.get("key");
                CacheKey::new(key).map_err(|e| CacheBackendError::Serialization(e.to_string()))
            })
            .collect()
    }
}
