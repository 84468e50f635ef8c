//! Cache entry shapes
//!
//! Two forms share one document store:
//! - [`CacheEntry`]: valid while `now - timestamp <= ttl`
//! - [`DeltaCacheEntry`]: valid by version, with an optional TTL fallback
//!   that forces periodic revalidation even without a poll
//!
//! All timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};

/// TTL-form entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
    pub ttl: i64,
}

impl<T> CacheEntry<T> {
    /// True once more than `ttl` milliseconds have passed since `timestamp`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms - self.timestamp > self.ttl
    }
}

/// Version-form entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaCacheEntry<T> {
    pub data: T,
    pub version: i64,
    /// When the last full snapshot was written; incremental writes keep it
    pub last_snapshot_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl<T> DeltaCacheEntry<T> {
    /// Only the optional TTL fallback can expire a version entry.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match (self.timestamp, self.ttl) {
            (Some(timestamp), Some(ttl)) => now_ms - timestamp > ttl,
            _ => false,
        }
    }
}

/// The stored document: one of the two entry forms with JSON data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheDocument {
    Ttl(CacheEntry<serde_json::Value>),
    Delta(DeltaCacheEntry<serde_json::Value>),
}

impl CacheDocument {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self {
            CacheDocument::Ttl(entry) => entry.is_expired(now_ms),
            CacheDocument::Delta(entry) => entry.is_expired(now_ms),
        }
    }

    pub fn data(&self) -> &serde_json::Value {
        match self {
            CacheDocument::Ttl(entry) => &entry.data,
            CacheDocument::Delta(entry) => &entry.data,
        }
    }

    /// Name of the entry form, for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheDocument::Ttl(_) => "ttl",
            CacheDocument::Delta(_) => "delta",
        }
    }
}
