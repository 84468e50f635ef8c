//! Version-based incremental sync against the structured endpoint
//!
//! Each data type moves through:
//!
//! ```text
//! Uninitialized ──init──▶ Cached ──poll──▶ Polling ──apply──▶ Cached
//!                            ▲                          └───▶ ReloadRequired
//!                            └────────────reload────────────────────┘
//! ```
//!
//! A version entry is written from a full snapshot and only ever superseded
//! by a newer one. Row-level changes are not merged: any non-empty change
//! set, a rejected poll, or a version that went backwards asks for a reload.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use sheetsync_core::domain::{CacheKey, ChangeSet, DomainRow, RawTable, SheetName};
use sheetsync_transport::parse::validate_table;

use crate::orchestrator::{FetchOrchestrator, FetchRequest, FetchTier, FetchedTable};
use crate::FetchError;

/// Sync progress of one data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeltaState {
    #[default]
    Uninitialized,
    /// A version entry is cached
    Cached { version: i64 },
    /// A change poll is in flight
    Polling { since: i64 },
    /// The cached entry is stale and needs a fresh snapshot
    ReloadRequired { version: i64 },
}

/// Data and version of a version entry
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaData {
    pub data: Vec<DomainRow>,
    pub version: i64,
}

/// Result of applying a change set to the cache
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub needs_reload: bool,
    pub version: i64,
    /// Current cached data when no reload is needed
    pub data: Option<Vec<DomainRow>>,
}

impl ApplyOutcome {
    fn reload(version: i64) -> Self {
        Self {
            needs_reload: true,
            version,
            data: None,
        }
    }
}

/// Snapshot, poll, apply and reload for declared data types
#[derive(Debug)]
pub struct DeltaSyncEngine {
    orchestrator: Arc<FetchOrchestrator>,
    states: DashMap<String, DeltaState>,
}

impl DeltaSyncEngine {
    pub fn new(orchestrator: Arc<FetchOrchestrator>) -> Self {
        Self {
            orchestrator,
            states: DashMap::new(),
        }
    }

    /// Current state of `data_type`
    pub fn state(&self, data_type: &str) -> DeltaState {
        self.states
            .get(data_type)
            .map(|state| *state)
            .unwrap_or_default()
    }

    fn set_state(&self, data_type: &str, state: DeltaState) {
        self.states.insert(data_type.to_string(), state);
    }

    /// Cached version entry, or a fresh snapshot when there is none
    pub async fn init(&self, data_type: &str, cache_key: &CacheKey) -> Result<DeltaData, FetchError> {
        if let Some(cached) = self.cached(cache_key).await {
            self.set_state(data_type, DeltaState::Cached {
                version: cached.version,
            });
            return Ok(cached);
        }
        self.reload(data_type, cache_key).await
    }

    /// Ask the endpoint for changes after `since_version`
    pub async fn poll_changes(
        &self,
        data_type: &str,
        since_version: i64,
    ) -> Result<ChangeSet, FetchError> {
        let sheet = self.sheet(data_type)?;
        let api = self.orchestrator.api()?;

        self.set_state(data_type, DeltaState::Polling {
            since: since_version,
        });
        let change_set = api
            .fetch_changes(&sheet, since_version)
            .await
            .map_err(FetchError::from_api)?;

        debug!(
            data_type,
            since = since_version,
            to_version = change_set.to_version,
            changes = change_set.changes.len(),
            needs_full_resync = change_set.needs_full_resync,
            "Polled changes"
        );
        Ok(change_set)
    }

    /// Decide what a change set means for the entry under `cache_key`
    ///
    /// An empty change set keeps the cached data and moves its version
    /// forward. Everything else needs a reload.
    pub async fn apply_changes_to_cache(
        &self,
        data_type: &str,
        change_set: &ChangeSet,
        cache_key: &CacheKey,
    ) -> ApplyOutcome {
        let to_version = change_set.to_version;

        if !change_set.ok || change_set.needs_full_resync {
            debug!(data_type, ok = change_set.ok, "Source asked for a full resync");
            return self.reload_required(data_type, to_version);
        }
        if !change_set.changes.is_empty() {
            debug!(
                data_type,
                changes = change_set.changes.len(),
                "Rows changed, reloading"
            );
            return self.reload_required(data_type, to_version);
        }

        let Some(cached) = self.cached(cache_key).await else {
            debug!(data_type, "Nothing cached, reloading");
            return self.reload_required(data_type, to_version);
        };
        if to_version < cached.version {
            warn!(
                data_type,
                cached_version = cached.version,
                to_version,
                "Source version went backwards, reloading"
            );
            return self.reload_required(data_type, to_version);
        }

        if to_version > cached.version {
            let store = self.orchestrator.cache();
            if let Err(e) = store.set_delta(cache_key, &cached.data, to_version, false).await {
                warn!(key = %cache_key, error = %e, "Could not advance cached version");
            }
        }
        self.set_state(data_type, DeltaState::Cached {
            version: to_version,
        });
        ApplyOutcome {
            needs_reload: false,
            version: to_version,
            data: Some(cached.data),
        }
    }

    /// Replace the entry under `cache_key` with a fresh snapshot
    pub async fn reload(&self, data_type: &str, cache_key: &CacheKey) -> Result<DeltaData, FetchError> {
        let request = FetchRequest::from_config(self.orchestrator.config(), data_type)?;
        let api = self.orchestrator.api()?;

        let snapshot = api
            .fetch_snapshot(&request.sheet)
            .await
            .map_err(FetchError::from_api)?;
        let table = RawTable::from_snapshot(&snapshot);
        validate_table(&table)?;

        let fetched = FetchedTable {
            sheet: request.sheet,
            table,
            version: Some(snapshot.version),
            tier: FetchTier::Api,
            route: None,
            recovered: Vec::new(),
        };
        let data = self
            .orchestrator
            .transform_table(data_type, &request.transformer_id, &fetched)
            .await?;

        let store = self.orchestrator.cache();
        if let Err(e) = store.set_delta(cache_key, &data, snapshot.version, true).await {
            warn!(key = %cache_key, error = %e, "Could not cache snapshot");
        }
        self.set_state(data_type, DeltaState::Cached {
            version: snapshot.version,
        });

        info!(
            data_type,
            version = snapshot.version,
            rows = data.len(),
            "Snapshot loaded"
        );
        Ok(DeltaData {
            data,
            version: snapshot.version,
        })
    }

    /// Bring `data_type` up to date: init, poll, apply, reload as needed
    ///
    /// A failed poll serves the cached data.
    pub async fn sync(&self, data_type: &str, cache_key: &CacheKey) -> Result<DeltaData, FetchError> {
        let current = match self.cached(cache_key).await {
            Some(cached) => cached,
            None => return self.reload(data_type, cache_key).await,
        };

        let change_set = match self.poll_changes(data_type, current.version).await {
            Ok(change_set) => change_set,
            Err(e) => {
                warn!(data_type, error = %e, "Change poll failed, serving cached data");
                self.set_state(data_type, DeltaState::Cached {
                    version: current.version,
                });
                return Ok(current);
            }
        };

        let outcome = self
            .apply_changes_to_cache(data_type, &change_set, cache_key)
            .await;
        if outcome.needs_reload {
            return self.reload(data_type, cache_key).await;
        }
        Ok(DeltaData {
            data: outcome.data.unwrap_or(current.data),
            version: outcome.version,
        })
    }

    async fn cached(&self, cache_key: &CacheKey) -> Option<DeltaData> {
        self.orchestrator
            .cache()
            .get_delta::<Vec<DomainRow>>(cache_key)
            .await
            .map(|view| DeltaData {
                data: view.data,
                version: view.version,
            })
    }

    fn sheet(&self, data_type: &str) -> Result<SheetName, FetchError> {
        Ok(FetchRequest::from_config(self.orchestrator.config(), data_type)?.sheet)
    }

    fn reload_required(&self, data_type: &str, version: i64) -> ApplyOutcome {
        self.set_state(data_type, DeltaState::ReloadRequired { version });
        ApplyOutcome::reload(version)
    }
}
