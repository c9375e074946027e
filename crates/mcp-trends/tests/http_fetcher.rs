// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! `ReqwestFetcher` against a local mock server.

use mcp_trends::model::{Outcome, Provenance, Target};
use mcp_trends::probe::{
    FetchError, FetchRequest, Fetcher, ProbeEngine, ProbeSettings, ReqwestFetcher, RequestLimits,
};
use mcp_trends::RunSignal;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UA: &str = "mcp-trends-test/0.1";

fn fetcher() -> ReqwestFetcher {
    ReqwestFetcher::new(UA, true).unwrap()
}

fn request(url: String, max_body_bytes: usize) -> FetchRequest {
    FetchRequest {
        url,
        timeout: Duration::from_secs(5),
        max_body_bytes,
    }
}

#[tokio::test]
async fn test_fetch_returns_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/mcp.json"))
        .and(header("user-agent", UA))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"name":"Mock"}"#, "application/json")
                .insert_header("etag", "\"abc123\"")
                .insert_header("last-modified", "Sat, 06 Sep 2025 08:00:00 GMT"),
        )
        .mount(&server)
        .await;

    let resp = fetcher()
        .fetch(&request(format!("{}/.well-known/mcp.json", server.uri()), 1024))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, br#"{"name":"Mock"}"#);
    assert_eq!(resp.content_type.as_deref(), Some("application/json"));
    assert_eq!(resp.etag.as_deref(), Some("\"abc123\""));
    assert_eq!(resp.last_modified.as_deref(), Some("Sat, 06 Sep 2025 08:00:00 GMT"));
    assert!(!resp.truncated);
    assert!(resp.tls.is_none());
}

#[tokio::test]
async fn test_body_is_capped() {
    let server = MockServer::start().await;
    Mock::given(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(5000)))
        .mount(&server)
        .await;

    let resp = fetcher()
        .fetch(&request(format!("{}/big", server.uri()), 100))
        .await
        .unwrap();
    assert_eq!(resp.body.len(), 100);
    assert!(resp.truncated);
}

#[tokio::test]
async fn test_redirect_is_not_followed() {
    let server = MockServer::start().await;
    Mock::given(path("/moved"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
        .mount(&server)
        .await;

    let resp = fetcher()
        .fetch(&request(format!("{}/moved", server.uri()), 1024))
        .await
        .unwrap();
    assert_eq!(resp.status, 302);
    assert!(resp.is_redirect());
    assert_eq!(resp.location.as_deref(), Some("/elsewhere"));
}

#[tokio::test]
async fn test_retry_after_header_exposed() {
    let server = MockServer::start().await;
    Mock::given(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "5"))
        .mount(&server)
        .await;

    let resp = fetcher()
        .fetch(&request(format!("{}/busy", server.uri()), 1024))
        .await
        .unwrap();
    assert_eq!(resp.status, 429);
    assert_eq!(resp.retry_after.as_deref(), Some("5"));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let req = FetchRequest {
        url: format!("{}/slow", server.uri()),
        timeout: Duration::from_millis(200),
        max_body_bytes: 1024,
    };
    assert_eq!(fetcher().fetch(&req).await.unwrap_err(), FetchError::Timeout);
}

#[tokio::test]
async fn test_refused_connection_is_connect_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = fetcher()
        .fetch(&request(format!("http://127.0.0.1:{port}/probe"), 1024))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Connect(_)), "{err:?}");
}

#[tokio::test]
async fn test_engine_falls_back_to_plain_http() {
    let server = MockServer::start().await;
    Mock::given(path("/.well-known/mcp.json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"name":"Local"}"#, "application/json"))
        .mount(&server)
        .await;
    let host = server.address().to_string();

    let settings = ProbeSettings {
        http_fallback: true,
        max_retries: 0,
        timeout: Duration::from_secs(5),
        ..ProbeSettings::default()
    };
    let engine = ProbeEngine::new(
        Arc::new(fetcher()),
        settings,
        Arc::new(RequestLimits::unlimited()),
    );
    let result = engine
        .probe(&Target::new(host.clone(), Provenance::Tranco { rank: 1 }), &RunSignal::never())
        .await;

    assert!(result.succeeded(), "{:?}", result.notes);
    let retained = result.retained_attempt().unwrap();
    assert_eq!(retained.final_url(), format!("http://{host}/.well-known/mcp.json"));
    assert_eq!(retained.outcome, Outcome::Success);
    assert!(result.notes.contains(&"http_fallback".to_string()));
    // The HTTPS attempt failed below HTTP and was kept in the audit trail.
    assert_eq!(result.attempts.len(), 2);
    assert!(result.attempts[0].status.is_none());
}
