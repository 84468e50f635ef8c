//! Integration tests for the structured endpoint client
//!
//! Verifies against a wiremock server:
//! - Snapshot and change set decoding, including the legacy grid
//! - Retry of transient failures and no retry of permanent ones
//! - Per-attempt deadlines
//! - The authenticated intermediary path

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sheetsync_core::config::ApiConfig;
use sheetsync_core::domain::{CellValue, SheetName};
use sheetsync_core::ManualClock;
use sheetsync_transport::{SheetApi, TransportError};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

fn sheet(name: &str) -> SheetName {
    SheetName::new(name).unwrap()
}

#[tokio::test]
async fn test_snapshot_is_fetched_with_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .and(query_param("action", "snapshot"))
        .and(query_param("sheet", "Holdings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "version": 42,
            "headers": ["Ticker", "Qty"],
            "rows": [
                {"key": "r1", "values": ["AAPL", 10]},
                {"key": 2, "values": ["MSFT", null]}
            ],
            "generatedAt": "2026-10-01T12:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 0);
    let snapshot = api.fetch_snapshot(&sheet("Holdings")).await.unwrap();

    assert_eq!(snapshot.version, 42);
    assert_eq!(snapshot.headers, vec!["Ticker", "Qty"]);
    assert_eq!(snapshot.rows[1].key, "2");
    assert_eq!(snapshot.rows[1].values[1], CellValue::empty());
}

#[tokio::test]
async fn test_legacy_grid_gets_synthetic_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            ["Ticker", "Qty"],
            ["AAPL", 10]
        ])))
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 0);
    let snapshot = api.fetch_snapshot(&sheet("Holdings")).await.unwrap();

    assert_eq!(snapshot.version, common::NOW_MS);
    assert_eq!(snapshot.headers, vec!["Ticker", "Qty"]);
    assert_eq!(snapshot.rows.len(), 1);
    assert_eq!(snapshot.rows[0].key, "1");
}

#[tokio::test]
async fn test_changes_carry_since_version() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .and(query_param("action", "changes"))
        .and(query_param("since", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "fromVersion": 7,
            "toVersion": 9,
            "changes": [{
                "id": "c1",
                "timestamp": 1760000000000_i64,
                "rowKey": "r1",
                "changedColumns": ["Qty"],
                "values": ["AAPL", 12]
            }],
            "needsFullResync": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 0);
    let change_set = api.fetch_changes(&sheet("Holdings"), 7).await.unwrap();

    assert!(change_set.ok);
    assert_eq!(change_set.to_version, 9);
    assert_eq!(change_set.changes.len(), 1);
    assert_eq!(change_set.changes[0].changed_columns, vec!["Qty"]);
}

#[tokio::test]
async fn test_rejected_change_poll_becomes_not_ok() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ok": false, "error": "reset"})),
        )
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 0);
    let change_set = api.fetch_changes(&sheet("Holdings"), 3).await.unwrap();
    assert!(!change_set.ok);
    assert!(change_set.needs_full_resync);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": 1, "headers": ["A"], "rows": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 3);
    let snapshot = api.fetch_snapshot(&sheet("Holdings")).await.unwrap();
    assert_eq!(snapshot.version, 1);
}

#[tokio::test]
async fn test_retry_exhaustion_returns_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 2);
    let err = api.fetch_snapshot(&sheet("Holdings")).await.unwrap_err();
    assert!(matches!(err, TransportError::RateLimited(_)));
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 3);
    let err = api.fetch_snapshot(&sheet("Holdings")).await.unwrap_err();
    assert!(matches!(err, TransportError::Unauthorized(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_not_found_has_remediation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 3);
    let err = api.fetch_snapshot(&sheet("Holdings")).await.unwrap_err();
    assert!(matches!(err, TransportError::NotFound(_)));
    assert!(err.remediation().contains("deployment URL"));
}

#[tokio::test]
async fn test_deadline_applies_per_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([["A"], [1]]))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 1)
        .with_timeouts(Duration::from_millis(100), Duration::from_millis(100));
    let err = api.fetch_snapshot(&sheet("Holdings")).await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn test_non_json_body_is_invalid_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let api = common::direct_api(&server, 0);
    let err = api.fetch_snapshot(&sheet("Holdings")).await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidPayload(_)));
}

#[tokio::test]
async fn test_token_routes_through_intermediary() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/relay"))
        .and(header("authorization", "Bearer secret-token"))
        .and(body_json(json!({"action": "changes", "sheet": "Holdings", "since": 5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fromVersion": 5, "toVersion": 5, "changes": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = ApiConfig {
        auth_token: Some("secret-token".into()),
        intermediary_url: Some(format!("{}/relay", server.uri())),
        ..ApiConfig::default()
    };
    let api = SheetApi::from_config(
        &config,
        common::fast_client(0),
        Arc::new(ManualClock::new(common::NOW_MS)),
    )
    .unwrap();

    let change_set = api.fetch_changes(&sheet("Holdings"), 5).await.unwrap();
    assert!(change_set.changes.is_empty());
}
