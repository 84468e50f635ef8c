//! Cache store
//!
//! Applies the expiry and merge rules on top of an [`ICacheBackend`]:
//!
//! - Reads never return expired data. Expiry is decided at read time, and an
//!   expired document is deleted on the way out. A failed deletion is logged
//!   and otherwise ignored.
//! - Writes replace the whole document. Version writes carry the last
//!   snapshot time forward unless they are themselves a snapshot.
//! - Callers treat the cache as an optimization, so reads and clears never
//!   fail. Writes return a `Result` that callers may log and discard.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use sheetsync_core::domain::{CacheDocument, CacheEntry, CacheKey, DeltaCacheEntry};
use sheetsync_core::ports::{CacheBackendError, ICacheBackend};
use sheetsync_core::{Clock, SystemClock};
use sheetsync_telemetry::MetricsRegistry;

use crate::CacheError;

/// Default lifetime of a TTL entry: 3 hours
pub const DEFAULT_TTL: Duration = Duration::from_secs(180 * 60);

/// Data and version read back from a version-form entry
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaView<T> {
    pub data: T,
    pub version: i64,
    pub last_snapshot_at: i64,
}

/// Shared cache store with TTL and version semantics
pub struct CacheStore {
    backend: Arc<dyn ICacheBackend>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    delta_ttl: Option<Duration>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("clock", &self.clock)
            .field("default_ttl", &self.default_ttl)
            .field("delta_ttl", &self.delta_ttl)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Creates a store over `backend` using the system clock and [`DEFAULT_TTL`]
    pub fn new(backend: Arc<dyn ICacheBackend>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            default_ttl: DEFAULT_TTL,
            delta_ttl: None,
            metrics: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Attach a TTL fallback to every version entry written from now on
    pub fn with_delta_ttl(mut self, ttl: Duration) -> Self {
        self.delta_ttl = Some(ttl);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Lifetime applied by [`CacheStore::set`] when no TTL is given
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Lifetime of delta snapshots, `None` when they never expire
    pub fn delta_ttl(&self) -> Option<Duration> {
        self.delta_ttl
    }

    /// Current time according to the store's clock
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    // ========================================================================
    // TTL form
    // ========================================================================

    /// Read the data stored under `key`
    ///
    /// Returns `None` when the key is absent, expired, unreadable or does not
    /// decode as `T`. Either entry form is accepted.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let document = self.load_live(key, "get").await?;
        match serde_json::from_value(document.data().clone()) {
            Ok(data) => {
                debug!(key = %key, kind = document.kind(), "Cache hit");
                self.record("get", "hit");
                Some(data)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached data has an unexpected shape");
                self.record("get", "error");
                None
            }
        }
    }

    /// Store `data` under `key`, replacing any existing document
    ///
    /// `ttl` defaults to [`CacheStore::default_ttl`].
    pub async fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let document = CacheDocument::Ttl(CacheEntry {
            data: serde_json::to_value(data)?,
            timestamp: self.clock.now_ms(),
            ttl: duration_ms(ttl),
        });
        self.write(key, &document, "set").await
    }

    // ========================================================================
    // Version form
    // ========================================================================

    /// Read a version-form entry
    ///
    /// TTL-form documents are not version entries and read as `None`.
    pub async fn get_delta<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<DeltaView<T>> {
        let entry = match self.load_live(key, "get_delta").await? {
            CacheDocument::Delta(entry) => entry,
            CacheDocument::Ttl(_) => {
                debug!(key = %key, "Cached document is not a version entry");
                self.record("get_delta", "miss");
                return None;
            }
        };

        match serde_json::from_value(entry.data) {
            Ok(data) => {
                debug!(key = %key, version = entry.version, "Version cache hit");
                self.record("get_delta", "hit");
                Some(DeltaView {
                    data,
                    version: entry.version,
                    last_snapshot_at: entry.last_snapshot_at,
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached data has an unexpected shape");
                self.record("get_delta", "error");
                None
            }
        }
    }

    /// Store a version-form entry under `key`
    ///
    /// `last_snapshot_at` becomes now when `is_snapshot`, otherwise it is
    /// carried forward from the existing version entry (or now, if none).
    pub async fn set_delta<T: Serialize>(
        &self,
        key: &CacheKey,
        data: &T,
        version: i64,
        is_snapshot: bool,
    ) -> Result<(), CacheError> {
        let now = self.clock.now_ms();
        let last_snapshot_at = if is_snapshot {
            now
        } else {
            match self.backend.load(key).await {
                Ok(Some(CacheDocument::Delta(existing))) => existing.last_snapshot_at,
                Ok(_) => now,
                Err(e) => {
                    debug!(key = %key, error = %e, "Could not read previous version entry");
                    now
                }
            }
        };

        let document = CacheDocument::Delta(DeltaCacheEntry {
            data: serde_json::to_value(data)?,
            version,
            last_snapshot_at,
            timestamp: Some(now),
            ttl: self.delta_ttl.map(duration_ms),
        });
        self.write(key, &document, "set_delta").await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete one entry, or every entry when `key` is `None`
    ///
    /// A refused clear is a no-op: read-only clients may call this freely.
    pub async fn clear(&self, key: Option<&CacheKey>) {
        let result = match key {
            Some(key) => self.backend.remove(key).await,
            None => self.backend.remove_all().await,
        };
        match result {
            Ok(()) => {
                debug!(key = ?key.map(CacheKey::as_str), "Cache cleared");
                self.record("clear", "success");
            }
            Err(e) => {
                self.record("clear", "failure");
                self.maintenance_failed(key.map(CacheKey::as_str), &e);
            }
        }
    }

    /// List stored keys
    pub async fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self.backend.keys().await?)
    }

    /// Load the raw document under `key` without applying expiry
    pub async fn inspect(&self, key: &CacheKey) -> Result<Option<CacheDocument>, CacheError> {
        Ok(self.backend.load(key).await?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Load a document and evict it if expired
    async fn load_live(&self, key: &CacheKey, operation: &str) -> Option<CacheDocument> {
        let document = match self.backend.load(key).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                self.record(operation, "miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                self.record(operation, "error");
                return None;
            }
        };

        let now = self.clock.now_ms();
        if document.is_expired(now) {
            debug!(key = %key, kind = document.kind(), "Cache entry expired");
            self.record(operation, "expired");
            if let Err(e) = self.backend.remove(key).await {
                self.maintenance_failed(Some(key.as_str()), &e);
            }
            return None;
        }

        Some(document)
    }

    async fn write(
        &self,
        key: &CacheKey,
        document: &CacheDocument,
        operation: &str,
    ) -> Result<(), CacheError> {
        match self.backend.store(key, document).await {
            Ok(()) => {
                debug!(key = %key, kind = document.kind(), "Cache written");
                self.record(operation, "success");
                Ok(())
            }
            Err(e) => {
                self.record(operation, "failure");
                Err(e.into())
            }
        }
    }

    /// Permission refusals are expected for read-only clients and only
    /// logged at debug; anything else is a warning and metered.
    fn maintenance_failed(&self, key: Option<&str>, e: &CacheBackendError) {
        if e.is_permission_denied() {
            debug!(key = ?key, error = %e, "Cache maintenance not permitted");
            return;
        }
        warn!(key = ?key, error = %e, "Cache maintenance failed");
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_maintenance_error(e.kind());
        }
    }

    fn record(&self, operation: &str, status: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_operation(operation, status);
        }
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sheetsync_core::ManualClock;

    use super::*;
    use crate::MemoryCacheBackend;

    fn store_at(start_ms: i64) -> (CacheStore, Arc<ManualClock>, Arc<MemoryCacheBackend>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let backend = Arc::new(MemoryCacheBackend::new());
        let store = CacheStore::new(backend.clone()).with_clock(clock.clone());
        (store, clock, backend)
    }

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_default_ttl_is_three_hours() {
        let (store, _, _) = store_at(0);
        assert_eq!(store.default_ttl(), Duration::from_secs(3 * 60 * 60));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (store, _, _) = store_at(0);
        let value: Option<Vec<i32>> = store.get(&key("sheet:none")).await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_get_respects_ttl_boundary_and_evicts() {
        let (store, clock, backend) = store_at(10_000);
        let k = key("sheet:positions");
        store
            .set(&k, &vec![1, 2, 3], Some(Duration::from_millis(500)))
            .await
            .unwrap();

        clock.set(10_500);
        let hit: Option<Vec<i32>> = store.get(&k).await;
        assert_eq!(hit, Some(vec![1, 2, 3]));
        assert_eq!(backend.len(), 1);

        clock.set(10_501);
        let miss: Option<Vec<i32>> = store.get(&k).await;
        assert!(miss.is_none());
        assert!(backend.is_empty(), "expired entry should be deleted");
    }

    #[tokio::test]
    async fn test_get_shape_mismatch_is_none() {
        let (store, _, _) = store_at(0);
        let k = key("sheet:positions");
        store.set(&k, &json!({"a": 1}), None).await.unwrap();
        let value: Option<Vec<String>> = store.get(&k).await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_set_delta_carries_last_snapshot_forward() {
        let (store, clock, _) = store_at(1_000);
        let k = key("delta:quotes");

        store.set_delta(&k, &json!(["a"]), 5, true).await.unwrap();
        clock.set(2_000);
        store.set_delta(&k, &json!(["b"]), 6, false).await.unwrap();

        let view: DeltaView<serde_json::Value> = store.get_delta(&k).await.unwrap();
        assert_eq!(view.version, 6);
        assert_eq!(view.last_snapshot_at, 1_000);
        assert_eq!(view.data, json!(["b"]));

        clock.set(3_000);
        store.set_delta(&k, &json!(["c"]), 7, true).await.unwrap();
        let view: DeltaView<serde_json::Value> = store.get_delta(&k).await.unwrap();
        assert_eq!(view.last_snapshot_at, 3_000);
    }

    #[tokio::test]
    async fn test_get_delta_ignores_ttl_documents() {
        let (store, _, _) = store_at(0);
        let k = key("sheet:positions");
        store.set(&k, &json!([]), None).await.unwrap();
        let view: Option<DeltaView<serde_json::Value>> = store.get_delta(&k).await;
        assert!(view.is_none());
    }

    #[tokio::test]
    async fn test_delta_ttl_fallback_expires_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = Arc::new(MemoryCacheBackend::new());
        let store = CacheStore::new(backend.clone())
            .with_clock(clock.clone())
            .with_delta_ttl(Duration::from_millis(100));
        let k = key("delta:quotes");

        store.set_delta(&k, &json!([1]), 1, true).await.unwrap();
        clock.set(100);
        assert!(store.get_delta::<serde_json::Value>(&k).await.is_some());
        clock.set(101);
        assert!(store.get_delta::<serde_json::Value>(&k).await.is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_clear_one_and_all() {
        let (store, _, backend) = store_at(0);
        store.set(&key("sheet:a"), &1, None).await.unwrap();
        store.set(&key("sheet:b"), &2, None).await.unwrap();

        store.clear(Some(&key("sheet:a"))).await;
        assert_eq!(backend.len(), 1);
        store.clear(None).await;
        assert!(backend.is_empty());
    }
}
