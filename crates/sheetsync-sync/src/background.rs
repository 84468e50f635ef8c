//! Opportunistic background synchronization
//!
//! When the application stops being visible every declared data type is
//! refreshed once. Data types reading the same sheet share one fetch; sheets
//! are fetched one after another with a short pause so the source is not hit
//! in a burst.
//!
//! A single in-memory flag keeps runs from overlapping. The flag stores the
//! start time of the current run, so a run that never finished stops
//! blocking new ones once the flag is older than its TTL.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use sheetsync_core::domain::{CacheKey, SheetName};

use crate::orchestrator::{FetchOrchestrator, FetchRequest, FetchedTable};

const IDLE: i64 = i64::MIN;

/// Application visibility as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// What happened to one sheet during a background run
#[derive(Debug, Clone, PartialEq)]
pub struct SheetOutcome {
    pub sheet: SheetName,
    /// Data types fed by this sheet
    pub data_types: Vec<String>,
    /// Cache keys written
    pub written: Vec<CacheKey>,
    /// Failure messages, prefixed with the data type when one is known
    pub failures: Vec<String>,
}

impl SheetOutcome {
    fn new(sheet: SheetName, data_types: Vec<String>) -> Self {
        Self {
            sheet,
            data_types,
            written: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Summary of one background run
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundSyncReport {
    pub started_at: i64,
    pub finished_at: i64,
    pub sheets: Vec<SheetOutcome>,
}

impl BackgroundSyncReport {
    pub fn succeeded(&self) -> usize {
        self.sheets.iter().filter(|s| s.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.sheets.len() - self.succeeded()
    }

    fn status(&self) -> &'static str {
        match (self.succeeded(), self.failed()) {
            (_, 0) => "success",
            (0, _) => "failure",
            _ => "partial",
        }
    }
}

#[derive(Debug, Clone)]
struct Member {
    request: FetchRequest,
    delta: bool,
}

/// Clears the in-progress flag when the run ends, unless a newer run owns it
struct FlagGuard<'a> {
    flag: &'a AtomicI64,
    started_at: i64,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .flag
            .compare_exchange(self.started_at, IDLE, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Runs at most one background sync at a time
#[derive(Debug)]
pub struct BackgroundSyncCoordinator {
    orchestrator: Arc<FetchOrchestrator>,
    in_progress_since: AtomicI64,
    flag_ttl: Duration,
    inter_sheet_delay: Duration,
}

impl BackgroundSyncCoordinator {
    /// Coordinator using the `sync` section of the orchestrator's configuration
    pub fn new(orchestrator: Arc<FetchOrchestrator>) -> Self {
        let sync = &orchestrator.config().sync;
        let flag_ttl = Duration::from_secs(sync.background_flag_ttl_secs);
        let inter_sheet_delay = Duration::from_millis(sync.inter_sheet_delay_ms);
        Self {
            orchestrator,
            in_progress_since: AtomicI64::new(IDLE),
            flag_ttl,
            inter_sheet_delay,
        }
    }

    pub fn with_flag_ttl(mut self, ttl: Duration) -> Self {
        self.flag_ttl = ttl;
        self
    }

    pub fn with_inter_sheet_delay(mut self, delay: Duration) -> Self {
        self.inter_sheet_delay = delay;
        self
    }

    /// True while a run holds a flag younger than its TTL
    pub fn is_running(&self) -> bool {
        let started = self.in_progress_since.load(Ordering::SeqCst);
        started != IDLE && !self.is_stale(started, self.orchestrator.clock().now_ms())
    }

    /// React to a visibility change; `Hidden` starts a run
    ///
    /// Returns `None` when nothing ran: the application became visible, or
    /// another run is still in progress.
    pub async fn on_visibility_change(
        &self,
        visibility: Visibility,
    ) -> Option<BackgroundSyncReport> {
        match visibility {
            Visibility::Visible => None,
            Visibility::Hidden => self.run().await,
        }
    }

    /// Refresh every declared data type unless a run is already in progress
    pub async fn run(&self) -> Option<BackgroundSyncReport> {
        let started_at = self.orchestrator.clock().now_ms();
        let Some(_guard) = self.try_acquire(started_at) else {
            debug!("Background sync already in progress");
            self.record("skipped");
            return None;
        };

        let groups = self.sheet_groups();
        info!(sheets = groups.len(), "Background sync started");

        let mut sheets = Vec::with_capacity(groups.len());
        for (index, (sheet, members)) in groups.into_iter().enumerate() {
            if index > 0 && !self.inter_sheet_delay.is_zero() {
                tokio::time::sleep(self.inter_sheet_delay).await;
            }
            sheets.push(self.sync_sheet(sheet, &members).await);
        }

        let report = BackgroundSyncReport {
            started_at,
            finished_at: self.orchestrator.clock().now_ms(),
            sheets,
        };
        self.record(report.status());
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Background sync finished"
        );
        Some(report)
    }

    fn try_acquire(&self, now: i64) -> Option<FlagGuard<'_>> {
        let current = self.in_progress_since.load(Ordering::SeqCst);
        if current != IDLE && !self.is_stale(current, now) {
            return None;
        }
        if current != IDLE {
            warn!(since = current, "Background sync flag is stale, taking it over");
        }
        self.in_progress_since
            .compare_exchange(current, now, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(FlagGuard {
            flag: &self.in_progress_since,
            started_at: now,
        })
    }

    fn is_stale(&self, started_at: i64, now: i64) -> bool {
        let ttl_ms = i64::try_from(self.flag_ttl.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(started_at) >= ttl_ms
    }

    /// Declared data types grouped by the sheet they read
    fn sheet_groups(&self) -> BTreeMap<SheetName, Vec<Member>> {
        let config = self.orchestrator.config();
        let mut groups: BTreeMap<SheetName, Vec<Member>> = BTreeMap::new();

        for (name, declared) in &config.data_types {
            match FetchRequest::from_config(config, name) {
                Ok(request) => groups
                    .entry(request.sheet.clone())
                    .or_default()
                    .push(Member {
                        request,
                        delta: declared.delta,
                    }),
                Err(e) => warn!(data_type = %name, error = %e, "Skipping data type"),
            }
        }
        groups
    }

    async fn sync_sheet(&self, sheet: SheetName, members: &[Member]) -> SheetOutcome {
        let data_types: Vec<String> = members
            .iter()
            .map(|m| m.request.data_type.clone())
            .collect();
        let label = data_types.join(",");
        let mut outcome = SheetOutcome::new(sheet, data_types);

        let fetched = match self.orchestrator.fetch_table(&label, &outcome.sheet).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(sheet = %outcome.sheet, error = %e, "Background sync of sheet failed");
                outcome.failures.push(e.to_string());
                return outcome;
            }
        };

        for member in members {
            match self.store(member, &fetched).await {
                Ok(Some(key)) => outcome.written.push(key),
                Ok(None) => {}
                Err(message) => {
                    warn!(
                        sheet = %outcome.sheet,
                        data_type = %member.request.data_type,
                        error = %message,
                        "Background sync of data type failed"
                    );
                    outcome
                        .failures
                        .push(format!("{}: {message}", member.request.data_type));
                }
            }
        }

        debug!(
            sheet = %outcome.sheet,
            written = outcome.written.len(),
            failed = outcome.failures.len(),
            "Sheet synced"
        );
        outcome
    }

    /// Transform and persist one data type; `None` when nothing was written
    async fn store(
        &self,
        member: &Member,
        fetched: &FetchedTable,
    ) -> Result<Option<CacheKey>, String> {
        let request = &member.request;
        let rows = self
            .orchestrator
            .transform_table(&request.data_type, &request.transformer_id, fetched)
            .await
            .map_err(|e| e.to_string())?;

        let cache = self.orchestrator.cache();
        let stored = match (member.delta, fetched.version) {
            (true, Some(version)) => {
                cache
                    .set_delta(&request.cache_key, &rows, version, true)
                    .await
            }
            (true, None) => {
                debug!(
                    data_type = %request.data_type,
                    "Export carries no version, leaving the version entry alone"
                );
                return Ok(None);
            }
            (false, _) => cache.set(&request.cache_key, &rows, request.ttl).await,
        };
        stored.map_err(|e| e.to_string())?;
        Ok(Some(request.cache_key.clone()))
    }

    fn record(&self, status: &str) {
        if let Some(metrics) = self.orchestrator.metrics() {
            metrics.record_background_sync(status);
        }
    }
}
