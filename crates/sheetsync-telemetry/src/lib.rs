//! SheetSync Telemetry - Observability
//!
//! Provides `MetricsRegistry`: Prometheus counters and histograms for fetch,
//! cache, transform and background sync outcomes. Rendered as text by the CLI.

pub mod metrics;

pub use metrics::MetricsRegistry;
