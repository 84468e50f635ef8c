//! Integration tests for background sync
//!
//! Verifies sheet grouping, per-type persistence and that one failing sheet
//! does not stop the rest of the run.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use sheetsync_core::domain::CacheKey;
use sheetsync_sync::{BackgroundSyncCoordinator, Visibility};
use wiremock::matchers::{path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_failing_sheet_does_not_stop_the_run() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .and(query_param("sheet", "Holdings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": 21,
            "headers": ["Ticker", "Qty"],
            "rows": [{"key": "r1", "values": ["AAPL", 10]}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/exec"))
        .and(query_param("sheet", "Prices"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    // The fast endpoint is the only tier
    let mut config = common::config(&server)
        .data_type("positions", "Holdings", "sheets:positions", "rows")
        .delta_data_type("holdings", "Holdings", "delta:holdings", "rows")
        .data_type("prices", "Prices", "sheets:prices", "rows")
        .build();
    config.fallback.export_url_template = None;
    let h = common::harness(config);
    let coordinator = BackgroundSyncCoordinator::new(Arc::clone(&h.orchestrator));

    let report = coordinator
        .on_visibility_change(Visibility::Hidden)
        .await
        .expect("run started");

    assert_eq!(report.sheets.len(), 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);

    let holdings = report
        .sheets
        .iter()
        .find(|s| s.sheet.as_str() == "Holdings")
        .unwrap();
    assert_eq!(holdings.data_types, vec!["holdings", "positions"]);
    assert_eq!(holdings.written.len(), 2);

    let prices = report
        .sheets
        .iter()
        .find(|s| s.sheet.as_str() == "Prices")
        .unwrap();
    assert!(!prices.is_success());
    assert!(prices.failures[0].contains("500"), "{:?}", prices.failures);

    let positions: Vec<Value> = h
        .cache
        .get(&CacheKey::new("sheets:positions").unwrap())
        .await
        .unwrap();
    assert_eq!(positions, vec![json!({"Ticker": "AAPL", "Qty": 10})]);
    let versioned = h
        .cache
        .get_delta::<Vec<Value>>(&CacheKey::new("delta:holdings").unwrap())
        .await
        .unwrap();
    assert_eq!(versioned.version, 21);

    assert_eq!(
        common::sample(&h.metrics, "sheetsync_background_sync_total", &[("status", "partial")]),
        Some(1.0)
    );
    assert!(!coordinator.is_running());
}

#[tokio::test]
async fn test_concurrent_hidden_events_run_once() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "version": 3,
                    "headers": ["Ticker"],
                    "rows": [{"key": "r1", "values": ["AAPL"]}]
                }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = common::harness(
        common::config(&server)
            .data_type("positions", "Holdings", "sheets:positions", "rows")
            .build(),
    );
    let coordinator = BackgroundSyncCoordinator::new(Arc::clone(&h.orchestrator));

    let (first, second) = tokio::join!(
        coordinator.on_visibility_change(Visibility::Hidden),
        coordinator.on_visibility_change(Visibility::Hidden),
    );

    assert_eq!(first.is_some() as u8 + second.is_some() as u8, 1);
    assert_eq!(
        common::sample(&h.metrics, "sheetsync_background_sync_total", &[("status", "skipped")]),
        Some(1.0)
    );
}
