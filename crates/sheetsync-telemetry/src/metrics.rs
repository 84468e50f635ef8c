//! Prometheus metrics registry for SheetSync
//!
//! Provides typed, labeled counters and histograms for the fetch tiers, the
//! cache store, the transform pipeline and background synchronization.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Central metrics registry holding all Prometheus metrics.
pub struct MetricsRegistry {
    registry: Registry,
    /// Counter: fetch attempts by (tier, status); tier is cache, api or route
    pub fetch_total: IntCounterVec,
    /// Counter: proxy route failures by reason tag
    pub route_failures_total: IntCounterVec,
    /// Counter: cache store operations by (operation, status)
    pub cache_operations_total: IntCounterVec,
    /// Counter: failed expiry deletions and clears by error kind
    pub cache_maintenance_errors_total: IntCounterVec,
    /// Counter: transform jobs by (path, status); path is worker or fallback
    pub transform_total: IntCounterVec,
    /// Counter: background sync runs by status
    pub background_sync_total: IntCounterVec,
    /// Histogram: transform duration in seconds
    pub transform_duration_seconds: HistogramVec,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("sheetsync".to_string()), None)?;

        let fetch_total = IntCounterVec::new(
            Opts::new("fetch_total", "Total fetch attempts by tier"),
            &["tier", "status"],
        )?;
        registry.register(Box::new(fetch_total.clone()))?;

        let route_failures_total = IntCounterVec::new(
            Opts::new("route_failures_total", "Total proxy route failures"),
            &["reason"],
        )?;
        registry.register(Box::new(route_failures_total.clone()))?;

        let cache_operations_total = IntCounterVec::new(
            Opts::new("cache_operations_total", "Total cache store operations"),
            &["operation", "status"],
        )?;
        registry.register(Box::new(cache_operations_total.clone()))?;

        let cache_maintenance_errors_total = IntCounterVec::new(
            Opts::new(
                "cache_maintenance_errors_total",
                "Failed cache deletions and clears",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(cache_maintenance_errors_total.clone()))?;

        let transform_total = IntCounterVec::new(
            Opts::new("transform_total", "Total transform jobs"),
            &["path", "status"],
        )?;
        registry.register(Box::new(transform_total.clone()))?;

        let background_sync_total = IntCounterVec::new(
            Opts::new("background_sync_total", "Total background sync runs"),
            &["status"],
        )?;
        registry.register(Box::new(background_sync_total.clone()))?;

        let transform_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "transform_duration_seconds",
                "Transform duration in seconds",
            )
            .buckets(vec![0.01, 0.1, 1.0, 10.0, 60.0, f64::INFINITY]),
            &["path"],
        )?;
        registry.register(Box::new(transform_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            fetch_total,
            route_failures_total,
            cache_operations_total,
            cache_maintenance_errors_total,
            transform_total,
            background_sync_total,
            transform_duration_seconds,
        })
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    /// Record a fetch outcome on one tier.
    pub fn record_fetch(&self, tier: &str, status: &str) {
        self.fetch_total.with_label_values(&[tier, status]).inc();
    }

    /// Record one failed proxy route.
    pub fn record_route_failure(&self, reason: &str) {
        self.route_failures_total.with_label_values(&[reason]).inc();
    }

    /// Record a cache store operation.
    pub fn record_cache_operation(&self, operation: &str, status: &str) {
        self.cache_operations_total
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Record an unexpected failure while deleting or clearing cache entries.
    pub fn record_cache_maintenance_error(&self, kind: &str) {
        self.cache_maintenance_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record a transform job outcome.
    pub fn record_transform(&self, path: &str, status: &str) {
        self.transform_total.with_label_values(&[path, status]).inc();
    }

    /// Observe a transform duration.
    pub fn observe_transform_duration(&self, path: &str, duration_secs: f64) {
        self.transform_duration_seconds
            .with_label_values(&[path])
            .observe(duration_secs);
    }

    /// Record a background sync run.
    pub fn record_background_sync(&self, status: &str) {
        self.background_sync_total.with_label_values(&[status]).inc();
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
