//! Integration tests for the raw-text export routes
//!
//! Verifies route ordering, failure reasons, HTML rejection and the
//! complete failure list when every route fails.

use std::time::Duration;

use sheetsync_core::domain::SheetName;
use sheetsync_transport::RouteFailureReason;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

const CSV: &str = "Ticker,Qty\nAAPL,10\nMSFT,5\n";

fn sheet() -> SheetName {
    SheetName::new("Holdings").unwrap()
}

#[tokio::test]
async fn test_direct_route_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/export"))
        .and(query_param("sheet", "Holdings"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CSV))
        .expect(1)
        .mount(&server)
        .await;

    let fetch = common::export_routes(&server)
        .fetch_table(&sheet())
        .await
        .unwrap();

    assert_eq!(fetch.route, "direct");
    assert!(fetch.recovered.is_empty());
    assert_eq!(fetch.table.len(), 2);
    assert_eq!(fetch.table.rows()[1].text("Ticker").as_deref(), Some("MSFT"));
}

#[tokio::test]
async fn test_blocked_route_falls_through_to_proxy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .and(query_param(
            "url",
            format!("{}/export?sheet=Holdings", server.uri()).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(CSV))
        .expect(1)
        .mount(&server)
        .await;

    let fetch = common::export_routes(&server)
        .fetch_table(&sheet())
        .await
        .unwrap();

    assert_eq!(fetch.route, "proxy-a");
    assert_eq!(fetch.recovered.len(), 1);
    assert_eq!(fetch.recovered[0].route, "direct");
    assert_eq!(
        fetch.recovered[0].reason,
        RouteFailureReason::OriginPolicyBlock
    );
}

#[tokio::test]
async fn test_html_page_counts_as_route_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/export"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<!DOCTYPE html><html>Sign in</html>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CSV))
        .mount(&server)
        .await;

    let fetch = common::export_routes(&server)
        .fetch_table(&sheet())
        .await
        .unwrap();

    assert_eq!(fetch.route, "proxy-a");
    assert_eq!(fetch.recovered[0].reason.tag(), "other");
}

#[tokio::test]
async fn test_all_routes_failed_names_every_route_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let failures = common::export_routes(&server)
        .fetch_table(&sheet())
        .await
        .unwrap_err();

    let summary: Vec<(String, &str)> = failures
        .iter()
        .map(|f| (f.route.clone(), f.reason.tag()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("direct".to_string(), "origin-policy block"),
            ("proxy-a".to_string(), "timed out"),
            ("proxy-b".to_string(), "server error"),
        ]
    );
}
