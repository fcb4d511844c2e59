mod common;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use cmsgate::auth::ApiKey;
use cmsgate::dns::DnsResolver;
use cmsgate::rate_limit::RateLimiter;
use cmsgate::server::{router, serve_on, AppState};
use common::{fake_scanner, FakeBehavior, FakeRunner, WORDPRESS_REPORT};
use http_body_util::BodyExt;
use tower::ServiceExt;

const API_KEY: &str = "test-api-key";

fn test_app(result_dir: &std::path::Path, behavior: FakeBehavior, limit: u32) -> (Router, Arc<FakeRunner>) {
    let (scanner, runner) = fake_scanner(result_dir, behavior);
    let state = AppState {
        scanner: Arc::new(scanner),
        limiter: Arc::new(RateLimiter::<IpAddr>::new(limit, Duration::from_secs(60))),
        api_key: ApiKey::new(API_KEY).unwrap(),
        dns: None,
    };
    (router(state), runner)
}

fn scan_request(path_segment: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/api/v1.0/cms/{path_segment}"))
        .header("X-API-KEY", API_KEY)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_scan_returns_report() {
    let dir = tempfile::tempdir().unwrap();
    let (app, runner) = test_app(dir.path(), FakeBehavior::Report(WORDPRESS_REPORT.into()), 10);

    let response = app.oneshot(scan_request("ma.rkus.io")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers().get("x-ratelimit-limit").unwrap(), "10");
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "9");

    let body = body_json(response).await;
    assert_eq!(body["cms_name"], "WordPress");
    assert_eq!(body["wp_users"], "markus,");

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].args.contains(&"https://ma.rkus.io".to_string()));
}

#[tokio::test]
async fn test_invalid_domains_never_reach_scanner() {
    let dir = tempfile::tempdir().unwrap();
    let (app, runner) = test_app(dir.path(), FakeBehavior::Report(WORDPRESS_REPORT.into()), 100);

    let long_label = "a".repeat(64);
    let rejected = [
        "example..com",
        ".example.com",
        "example.com.",
        "-example.com",
        "example.1com",
        "ex%C3%A4mple.com",
        "example.com%2F..%2F..%2Fetc%2Fpasswd",
        "..%2F..%2Fetc",
        "a.com%3Bid",
        "a.com%20--proxy",
        "a.com%00",
        "a.com%0Ainjected",
        "%FF%FE",
        "%E2%82",
        long_label.as_str(),
    ];

    for segment in rejected {
        let response = app.clone().oneshot(scan_request(segment)).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "expected rejection for {segment}"
        );
        assert_eq!(body_json(response).await, serde_json::json!("invalid domain"));
    }

    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_missing_api_key() {
    let dir = tempfile::tempdir().unwrap();
    let (app, runner) = test_app(dir.path(), FakeBehavior::Report(WORDPRESS_REPORT.into()), 10);

    let request = Request::builder()
        .uri("/api/v1.0/cms/example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await, serde_json::json!("unauthorized"));

    let request = Request::builder()
        .uri("/api/v1.0/cms/example.com")
        .header("X-API-KEY", "wrong-api-key")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_scan_failure_is_generic() {
    let dir = tempfile::tempdir().unwrap();

    for behavior in [FakeBehavior::Fail(2), FakeBehavior::NoReport, FakeBehavior::Timeout] {
        let (app, runner) = test_app(dir.path(), behavior, 10);
        let response = app.oneshot(scan_request("example.com")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!("could not query domain")
        );
        assert_eq!(runner.calls().len(), 1);
    }
}

#[tokio::test]
async fn test_unresolvable_domain_is_not_scanned() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (scanner, runner) = fake_scanner(dir.path(), FakeBehavior::Report(WORDPRESS_REPORT.into()));
    let state = AppState {
        scanner: Arc::new(scanner),
        limiter: Arc::new(RateLimiter::new(10, Duration::from_secs(60))),
        api_key: ApiKey::new(API_KEY)?,
        dns: Some(Arc::new(DnsResolver::new()?)),
    };

    // .invalid is reserved and never resolves
    let response = router(state).oneshot(scan_request("nonexistent.invalid")).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        serde_json::json!("could not query domain")
    );
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_applies_before_auth() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _runner) = test_app(dir.path(), FakeBehavior::Report(WORDPRESS_REPORT.into()), 2);

    for _ in 0..2 {
        let response = app.clone().oneshot(scan_request("example.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Exhausted budget: even unauthenticated requests get 429
    let request = Request::builder()
        .uri("/api/v1.0/cms/example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");
    assert_eq!(body_json(response).await, serde_json::json!("Limit exceeded"));

    let response = app.oneshot(scan_request("example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_health_is_open() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _runner) = test_app(dir.path(), FakeBehavior::NoReport, 1);

    for _ in 0..3 {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _runner) = test_app(dir.path(), FakeBehavior::NoReport, 1);

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-1234")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-1234");
}

#[tokio::test]
async fn test_unknown_route() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _runner) = test_app(dir.path(), FakeBehavior::NoReport, 1);

    let request = Request::builder()
        .uri("/api/v1.0/cms/example.com/extra")
        .header("X-API-KEY", API_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_end_to_end_over_socket() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (scanner, runner) = fake_scanner(dir.path(), FakeBehavior::Report(WORDPRESS_REPORT.into()));
    let state = AppState {
        scanner: Arc::new(scanner),
        limiter: Arc::new(RateLimiter::new(1, Duration::from_secs(60))),
        api_key: ApiKey::new(API_KEY)?,
        dns: None,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(serve_on(listener, state, async move {
        let _ = shutdown_rx.await;
    }));

    let client = reqwest::Client::builder().no_proxy().build()?;
    let url = format!("http://{addr}/api/v1.0/cms/ma.rkus.io");

    let response = client.get(&url).header("X-API-KEY", API_KEY).send().await?;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["cms_id"], "wp");

    // Limit of one per client address
    let response = client.get(&url).header("X-API-KEY", API_KEY).send().await?;
    assert_eq!(response.status().as_u16(), 429);

    assert_eq!(runner.calls().len(), 1);

    let _ = shutdown_tx.send(());
    server.await??;
    Ok(())
}
