//! Shared test helpers for transport integration tests
//!
//! Each helper returns clients pointed at a wiremock server with a fast
//! retry policy so retry paths finish in milliseconds.

use std::sync::Arc;
use std::time::Duration;

use sheetsync_core::config::{FallbackConfig, ProxyRoute};
use sheetsync_core::ManualClock;
use sheetsync_transport::{ExportRoutes, RetryPolicy, SheetApi, TransportClient};
use wiremock::MockServer;

/// Clock value used for synthetic legacy versions
pub const NOW_MS: i64 = 1_760_000_000_000;

pub fn fast_client(max_retries: u32) -> Arc<TransportClient> {
    Arc::new(TransportClient::new(RetryPolicy::new(
        max_retries,
        Duration::from_millis(10),
    )))
}

/// Direct structured-endpoint client for `<server>/exec`
pub fn direct_api(server: &MockServer, max_retries: u32) -> SheetApi {
    SheetApi::direct(
        &format!("{}/exec", server.uri()),
        fast_client(max_retries),
        Arc::new(ManualClock::new(NOW_MS)),
    )
    .expect("valid endpoint")
}

/// Export routes whose export URL and proxies all live on `server`
///
/// Routes are `direct` (`/export`), `proxy-a` (`/a?url=..`) and
/// `proxy-b` (`/b?url=..`), tried in that order.
#[allow(dead_code)]
pub fn export_routes(server: &MockServer) -> ExportRoutes {
    let config = FallbackConfig {
        export_url_template: Some(format!("{}/export?sheet={{sheet}}", server.uri())),
        proxy_routes: vec![
            ProxyRoute {
                name: "direct".into(),
                template: "{url}".into(),
            },
            ProxyRoute {
                name: "proxy-a".into(),
                template: format!("{}/a?url={{url}}", server.uri()),
            },
            ProxyRoute {
                name: "proxy-b".into(),
                template: format!("{}/b?url={{url}}", server.uri()),
            },
        ],
        route_pause_ms: 5,
        timeout_secs: 2,
    };
    ExportRoutes::from_config(&config, fast_client(0)).expect("valid fallback config")
}
