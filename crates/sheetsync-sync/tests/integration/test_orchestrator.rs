//! Integration tests for the tiered fetch
//!
//! Covers the cache short circuit, fast endpoint success and refusal, the
//! export fallback with partial and total route failure, empty transforms
//! and best-effort cache writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sheetsync_core::domain::{CacheDocument, CacheKey, SheetName};
use sheetsync_core::ports::{CacheBackendError, ICacheBackend, TransformInput, Transformer};
use sheetsync_sync::{
    ColumnsTransformer, FetchError, FetchRequest, FetchTier, RowsTransformer, TransformerRegistry,
};
use sheetsync_transport::parse::parse_delimited;
use sheetsync_transport::RouteFailureReason;
use wiremock::matchers::{any, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{self, HOLDINGS_CSV, NOW_MS};

fn holdings_snapshot() -> Value {
    json!({
        "ok": true,
        "version": 12,
        "headers": ["Ticker", "Qty"],
        "rows": [
            {"key": "r1", "values": ["AAPL", 10]},
            {"key": "r2", "values": ["MSFT", 5]}
        ]
    })
}

#[tokio::test]
async fn test_fresh_cache_entry_needs_no_network() {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let h = common::harness(
        common::config(&server)
            .data_type("positions", "Holdings", "sheets:positions", "rows")
            .build(),
    );
    let key = CacheKey::new("sheets:positions").unwrap();
    let cached = json!([{"ticker": "AAPL"}]);

    h.clock.set(NOW_MS - 1_000);
    h.cache
        .set(&key, &cached, Some(Duration::from_millis(5_000)))
        .await
        .unwrap();
    h.clock.set(NOW_MS);

    let rows = h.orchestrator.fetch("positions", false).await.unwrap();
    assert_eq!(Value::Array(rows), cached);
}

#[tokio::test]
async fn test_fast_endpoint_result_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .and(query_param("action", "snapshot"))
        .and(query_param("sheet", "Holdings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(holdings_snapshot()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/export"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let h = common::harness(
        common::config(&server)
            .data_type("positions", "Holdings", "sheets:positions", "rows")
            .build(),
    );

    let first = h.orchestrator.fetch("positions", false).await.unwrap();
    let second = h.orchestrator.fetch("positions", false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0], json!({"Ticker": "AAPL", "Qty": 10}));
    let fetches = |tier, status| {
        common::sample(&h.metrics, "sheetsync_fetch_total", &[("tier", tier), ("status", status)])
    };
    assert_eq!(fetches("api", "success"), Some(1.0));
    assert_eq!(fetches("cache", "hit"), Some(1.0));
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(holdings_snapshot()))
        .expect(2)
        .mount(&server)
        .await;

    let h = common::harness(
        common::config(&server)
            .data_type("positions", "Holdings", "sheets:positions", "rows")
            .build(),
    );

    h.orchestrator.fetch("positions", false).await.unwrap();
    h.orchestrator.fetch("positions", true).await.unwrap();
}

#[tokio::test]
async fn test_slow_endpoint_and_blocked_proxy_recover_on_next_route() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(holdings_snapshot())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    Mock::given(path("/a"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HOLDINGS_CSV))
        .mount(&server)
        .await;

    let config = common::config(&server)
        .fallback_proxy_routes(vec![
            common::route("proxy-a", format!("{}/a?url={{url}}", server.uri())),
            common::route("proxy-b", format!("{}/b?url={{url}}", server.uri())),
        ])
        .data_type("positions", "Holdings", "sheets:positions", "rows")
        .build();
    let h = common::harness(config);

    let fetched = h
        .orchestrator
        .fetch_table("positions", &SheetName::new("Holdings").unwrap())
        .await
        .unwrap();
    assert_eq!(fetched.tier, FetchTier::Export);
    assert_eq!(fetched.route.as_deref(), Some("proxy-b"));
    assert_eq!(fetched.recovered.len(), 1);
    assert_eq!(fetched.recovered[0].route, "proxy-a");
    assert_eq!(
        fetched.recovered[0].reason,
        RouteFailureReason::OriginPolicyBlock
    );

    let rows = h.orchestrator.fetch("positions", false).await.unwrap();
    let input = TransformInput {
        rows: parse_delimited(HOLDINGS_CSV).unwrap().into_rows(),
        ..TransformInput::default()
    };
    let expected = RowsTransformer.transform(&input, &mut |_| {}).unwrap();
    assert_eq!(rows, expected);
}

#[tokio::test]
async fn test_all_routes_failed_names_each_route_in_order() {
    let server = MockServer::start().await;
    Mock::given(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    Mock::given(path("/a"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(path("/b"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    // No fast endpoint: the export is the only tier
    let mut config = common::config(&server)
        .data_type("positions", "Holdings", "sheets:positions", "rows")
        .build();
    config.api.endpoint_url = None;
    let h = common::harness(config);

    let err = h.orchestrator.fetch("positions", false).await.unwrap_err();
    let FetchError::AllRoutesFailed { failures, .. } = &err else {
        panic!("expected AllRoutesFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 3);

    let message = err.to_string();
    let timed_out = message.find("direct: timed out").unwrap();
    let server_error = message.find("proxy-a: server error").unwrap();
    let blocked = message.find("proxy-b: origin-policy block").unwrap();
    assert!(timed_out < server_error && server_error < blocked, "{message}");
    assert!(message.contains("retry later"));

    assert_eq!(
        common::sample(&h.metrics, "sheetsync_route_failures_total", &[("reason", "timed out")]),
        Some(1.0)
    );
}

async fn refused_endpoint_falls_back_to_export(status: u16) {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .respond_with(ResponseTemplate::new(status))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(path("/export"))
        .and(query_param("sheet", "Holdings"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HOLDINGS_CSV))
        .expect(2)
        .mount(&server)
        .await;

    let h = common::harness(
        common::config(&server)
            .data_type("positions", "Holdings", "sheets:positions", "rows")
            .build(),
    );

    let fetched = h
        .orchestrator
        .fetch_table("positions", &SheetName::new("Holdings").unwrap())
        .await
        .unwrap();
    assert_eq!(fetched.tier, FetchTier::Export);
    assert_eq!(fetched.route.as_deref(), Some("direct"));

    let rows = h.orchestrator.fetch("positions", true).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Ticker"], "AAPL");
}

#[tokio::test]
async fn test_rejected_credentials_fall_back_to_export() {
    refused_endpoint_falls_back_to_export(401).await;
}

#[tokio::test]
async fn test_forbidden_endpoint_falls_back_to_export() {
    refused_endpoint_falls_back_to_export(403).await;
}

#[tokio::test]
async fn test_rejected_credentials_remediation_survives_route_failures() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    for route in ["/export", "/a", "/b"] {
        Mock::given(path(route))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
    }

    let h = common::harness(
        common::config(&server)
            .data_type("positions", "Holdings", "sheets:positions", "rows")
            .build(),
    );

    let err = h.orchestrator.fetch("positions", false).await.unwrap_err();
    let FetchError::AllRoutesFailed {
        api_remediation,
        failures,
        ..
    } = &err
    else {
        panic!("expected AllRoutesFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 3);
    let remediation = api_remediation.expect("refused access remediation");
    assert!(err.to_string().contains(remediation), "{err}");
}

#[tokio::test]
async fn test_rejected_credentials_without_export_are_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = common::config(&server)
        .data_type("positions", "Holdings", "sheets:positions", "rows")
        .build();
    config.fallback.export_url_template = None;
    let h = common::harness(config);

    let err = h.orchestrator.fetch("positions", false).await.unwrap_err();
    assert!(matches!(err, FetchError::Unauthorized { .. }), "{err:?}");
}

#[tokio::test]
async fn test_empty_transform_names_required_columns() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(path("/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ticker,Qty\n,10\n,5\n"))
        .mount(&server)
        .await;

    let mut registry = TransformerRegistry::with_builtins();
    registry.register(Arc::new(ColumnsTransformer::new("tickers", ["Ticker"])));
    let h = common::harness_with(
        common::config(&server)
            .data_type("tickers", "Holdings", "sheets:tickers", "tickers")
            .build(),
        registry,
        Arc::new(sheetsync_cache::MemoryCacheBackend::new()),
    );

    let err = h.orchestrator.fetch("tickers", false).await.unwrap_err();
    match &err {
        FetchError::EmptyTransform {
            transformer,
            input_rows,
            required_columns,
        } => {
            assert_eq!(transformer, "tickers");
            assert_eq!(*input_rows, 2);
            assert_eq!(required_columns, &vec!["Ticker".to_string()]);
        }
        other => panic!("expected EmptyTransform, got {other:?}"),
    }
    assert!(h.cache.keys().await.unwrap().is_empty());
}

/// Backend whose writes always fail
struct FullBackend;

#[async_trait]
impl ICacheBackend for FullBackend {
    async fn load(&self, _key: &CacheKey) -> Result<Option<CacheDocument>, CacheBackendError> {
        Ok(None)
    }

    async fn store(&self, _key: &CacheKey, _doc: &CacheDocument) -> Result<(), CacheBackendError> {
        Err(CacheBackendError::QuotaExceeded("storage full".into()))
    }

    async fn remove(&self, _key: &CacheKey) -> Result<(), CacheBackendError> {
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), CacheBackendError> {
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<CacheKey>, CacheBackendError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_failed_cache_write_still_returns_rows() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(holdings_snapshot()))
        .mount(&server)
        .await;

    let h = common::harness_with(
        common::config(&server).build(),
        TransformerRegistry::with_builtins(),
        Arc::new(FullBackend),
    );
    let request = FetchRequest::new(
        "positions",
        SheetName::new("Holdings").unwrap(),
        "rows",
        CacheKey::new("sheets:positions").unwrap(),
    );

    let rows = h.orchestrator.fetch_with_fallback(&request).await.unwrap();
    assert_eq!(rows.len(), 2);
}
