//! In-memory implementation of ICacheBackend
//!
//! Keeps documents in a `DashMap`. Nothing is shared across processes, so
//! this backend suits tests and one-shot CLI runs.

use async_trait::async_trait;
use dashmap::DashMap;

use sheetsync_core::domain::{CacheDocument, CacheKey};
use sheetsync_core::ports::{CacheBackendError, ICacheBackend};

/// Process-local document store
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    documents: DashMap<CacheKey, CacheDocument>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl ICacheBackend for MemoryCacheBackend {
    async fn load(&self, key: &CacheKey) -> Result<Option<CacheDocument>, CacheBackendError> {
        Ok(self.documents.get(key).map(|doc| doc.value().clone()))
    }

    async fn store(
        &self,
        key: &CacheKey,
        document: &CacheDocument,
    ) -> Result<(), CacheBackendError> {
        self.documents.insert(key.clone(), document.clone());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<(), CacheBackendError> {
        self.documents.remove(key);
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), CacheBackendError> {
        self.documents.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, CacheBackendError> {
        let mut keys: Vec<CacheKey> = self.documents.iter().map(|e| e.key().clone()).collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(keys)
    }
}
