//! Integration tests for version-based sync
//!
//! Verifies snapshot initialization, change polling and the apply rules
//! against a mocked structured endpoint.

use std::sync::Arc;

use serde_json::json;
use sheetsync_core::domain::CacheKey;
use sheetsync_sync::{ApplyOutcome, DeltaState, DeltaSyncEngine};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{self, Harness, NOW_MS};

fn key() -> CacheKey {
    CacheKey::new("delta:positions").unwrap()
}

fn harness(server: &MockServer) -> Harness {
    common::harness(
        common::config(server)
            .delta_data_type("positions", "Holdings", "delta:positions", "rows")
            .build(),
    )
}

fn snapshot(version: i64, qty: i64) -> serde_json::Value {
    json!({
        "ok": true,
        "version": version,
        "headers": ["Ticker", "Qty"],
        "rows": [{"key": "r1", "values": ["AAPL", qty]}]
    })
}

async fn mount_snapshot(server: &MockServer, version: i64, qty: i64, times: u64) {
    Mock::given(method("GET"))
        .and(path("/exec"))
        .and(query_param("action", "snapshot"))
        .and(query_param("sheet", "Holdings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot(version, qty)))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_init_loads_snapshot_once() {
    let server = MockServer::start().await;
    mount_snapshot(&server, 5, 10, 1).await;

    let h = harness(&server);
    let engine = DeltaSyncEngine::new(Arc::clone(&h.orchestrator));

    let first = engine.init("positions", &key()).await.unwrap();
    let second = engine.init("positions", &key()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.version, 5);
    assert_eq!(first.data, vec![json!({"Ticker": "AAPL", "Qty": 10})]);
    assert_eq!(engine.state("positions"), DeltaState::Cached { version: 5 });

    let view = h
        .cache
        .get_delta::<serde_json::Value>(&key())
        .await
        .unwrap();
    assert_eq!(view.last_snapshot_at, NOW_MS);
}

#[tokio::test]
async fn test_legacy_grid_snapshot_gets_clock_version() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .and(query_param("action", "snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            ["Ticker", "Qty"],
            ["AAPL", 10]
        ])))
        .mount(&server)
        .await;

    let h = harness(&server);
    let engine = DeltaSyncEngine::new(Arc::clone(&h.orchestrator));

    let loaded = engine.init("positions", &key()).await.unwrap();
    assert_eq!(loaded.version, NOW_MS);
}

#[tokio::test]
async fn test_empty_poll_without_cache_requires_reload() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .and(query_param("action", "changes"))
        .and(query_param("since", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "fromVersion": 0,
            "toVersion": 42,
            "changes": [],
            "needsFullResync": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    let engine = DeltaSyncEngine::new(Arc::clone(&h.orchestrator));

    let change_set = engine.poll_changes("positions", 0).await.unwrap();
    assert_eq!(engine.state("positions"), DeltaState::Polling { since: 0 });

    let outcome = engine
        .apply_changes_to_cache("positions", &change_set, &key())
        .await;
    assert_eq!(
        outcome,
        ApplyOutcome {
            needs_reload: true,
            version: 42,
            data: None
        }
    );
}

#[tokio::test]
async fn test_sync_without_changes_keeps_data_and_advances_version() {
    let server = MockServer::start().await;
    mount_snapshot(&server, 5, 10, 1).await;
    Mock::given(path("/exec"))
        .and(query_param("action", "changes"))
        .and(query_param("since", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fromVersion": 5, "toVersion": 6, "changes": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    let engine = DeltaSyncEngine::new(Arc::clone(&h.orchestrator));
    engine.init("positions", &key()).await.unwrap();

    h.clock.advance(60_000);
    let synced = engine.sync("positions", &key()).await.unwrap();

    assert_eq!(synced.version, 6);
    assert_eq!(synced.data, vec![json!({"Ticker": "AAPL", "Qty": 10})]);
    let view = h
        .cache
        .get_delta::<serde_json::Value>(&key())
        .await
        .unwrap();
    assert_eq!(view.version, 6);
    assert_eq!(view.last_snapshot_at, NOW_MS);
}

#[tokio::test]
async fn test_sync_with_changes_reloads_snapshot() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .and(query_param("action", "changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fromVersion": 5,
            "toVersion": 9,
            "changes": [{
                "id": "c1",
                "rowKey": "r1",
                "changedColumns": ["Qty"],
                "values": ["AAPL", 12]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_snapshot(&server, 9, 12, 1).await;

    let h = harness(&server);
    h.cache
        .set_delta(&key(), &vec![json!({"Ticker": "AAPL", "Qty": 10})], 5, true)
        .await
        .unwrap();
    let engine = DeltaSyncEngine::new(Arc::clone(&h.orchestrator));

    let synced = engine.sync("positions", &key()).await.unwrap();

    assert_eq!(synced.version, 9);
    assert_eq!(synced.data, vec![json!({"Ticker": "AAPL", "Qty": 12})]);
    assert_eq!(engine.state("positions"), DeltaState::Cached { version: 9 });
}

#[tokio::test]
async fn test_full_resync_request_reloads_snapshot() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .and(query_param("action", "changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fromVersion": 5, "toVersion": 5, "changes": [], "needsFullResync": true
        })))
        .mount(&server)
        .await;
    mount_snapshot(&server, 7, 11, 1).await;

    let h = harness(&server);
    h.cache
        .set_delta(&key(), &vec![json!({"Ticker": "AAPL", "Qty": 10})], 5, true)
        .await
        .unwrap();
    let engine = DeltaSyncEngine::new(Arc::clone(&h.orchestrator));

    let synced = engine.sync("positions", &key()).await.unwrap();
    assert_eq!(synced.version, 7);
}

#[tokio::test]
async fn test_failed_poll_serves_cached_data() {
    let server = MockServer::start().await;
    Mock::given(path("/exec"))
        .and(query_param("action", "changes"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    mount_snapshot(&server, 9, 12, 0).await;

    let h = harness(&server);
    let cached = vec![json!({"Ticker": "AAPL", "Qty": 10})];
    h.cache.set_delta(&key(), &cached, 5, true).await.unwrap();
    let engine = DeltaSyncEngine::new(Arc::clone(&h.orchestrator));

    let synced = engine.sync("positions", &key()).await.unwrap();
    assert_eq!(synced.version, 5);
    assert_eq!(synced.data, cached);
}
