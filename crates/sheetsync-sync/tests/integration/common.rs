//! Shared harness for sync integration tests

use std::sync::Arc;

use sheetsync_cache::{CacheStore, MemoryCacheBackend};
use sheetsync_core::config::{Config, ConfigBuilder, ProxyRoute};
use sheetsync_core::ports::ICacheBackend;
use sheetsync_core::ManualClock;
use sheetsync_sync::{FetchOrchestrator, TransformPipeline, TransformerRegistry};
use sheetsync_telemetry::MetricsRegistry;
use sheetsync_transport::{RetryPolicy, TransportClient};
use wiremock::MockServer;

/// Clock value every harness starts at
pub const NOW_MS: i64 = 1_760_000_000_000;

pub const HOLDINGS_CSV: &str = "Ticker,Qty\nAAPL,10\nMSFT,5\n";

pub struct Harness {
    pub orchestrator: Arc<FetchOrchestrator>,
    pub cache: Arc<CacheStore>,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<MetricsRegistry>,
}

/// Fast endpoint at `/exec`, export at `/export`, proxies at `/a` and `/b`
///
/// No retries and one-second deadlines so failure paths finish quickly.
pub fn config(server: &MockServer) -> ConfigBuilder {
    ConfigBuilder::new()
        .api_endpoint_url(format!("{}/exec", server.uri()))
        .api_timeout_secs(1)
        .api_snapshot_timeout_secs(1)
        .fallback_export_url_template(format!("{}/export?sheet={{sheet}}", server.uri()))
        .fallback_proxy_routes(vec![
            route("direct", "{url}".to_string()),
            route("proxy-a", format!("{}/a?url={{url}}", server.uri())),
            route("proxy-b", format!("{}/b?url={{url}}", server.uri())),
        ])
        .fallback_route_pause_ms(5)
        .fallback_timeout_secs(1)
        .retry_max_retries(0)
        .retry_base_delay_ms(10)
        .sync_inter_sheet_delay_ms(5)
}

pub fn route(name: &str, template: String) -> ProxyRoute {
    ProxyRoute {
        name: name.to_string(),
        template,
    }
}

pub fn harness(config: Config) -> Harness {
    harness_with(config, TransformerRegistry::with_builtins(), Arc::new(MemoryCacheBackend::new()))
}

pub fn harness_with(
    config: Config,
    registry: TransformerRegistry,
    backend: Arc<dyn ICacheBackend>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let metrics = Arc::new(MetricsRegistry::new().expect("metrics registry"));
    let cache = Arc::new(
        CacheStore::new(backend)
            .with_clock(clock.clone())
            .with_metrics(metrics.clone()),
    );
    let pipeline = Arc::new(
        TransformPipeline::from_config(&config.transform, registry).with_metrics(metrics.clone()),
    );
    let client = Arc::new(TransportClient::new(RetryPolicy::from_config(&config.retry)));
    let orchestrator = FetchOrchestrator::from_config(
        Arc::new(config),
        cache.clone(),
        pipeline,
        client,
        clock.clone(),
    )
    .with_metrics(metrics.clone());

    Harness {
        orchestrator: Arc::new(orchestrator),
        cache,
        clock,
        metrics,
    }
}

/// Value of the sample of `name` carrying every label in `labels`
pub fn sample(metrics: &MetricsRegistry, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let text = metrics.encode().expect("encode metrics");
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| line.starts_with(&format!("{name}{{")) || line.starts_with(&format!("{name} ")))
        .find(|line| {
            labels
                .iter()
                .all(|(k, v)| line.contains(&format!("{k}=\"{v}\"")))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}
