//! HTTP front end for CMS scans
//!
//! Exposes `GET /api/v1.0/cms/{domain}` and `GET /health`. The scan route
//! passes through, outermost first:
//!
//! - request ID assignment and tracing
//! - per-client rate limiting
//! - the API key gate
//!
//! The domain segment is percent-decoded to raw bytes and validated before
//! anything else touches it; a rejected name never reaches the scanner.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use percent_encoding::percent_decode_str;
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::auth::{require_api_key, ApiKey};
use crate::dns::DnsResolver;
use crate::error::ApiError;
use crate::rate_limit::RateLimiter;
use crate::sanitize::escape_untrusted;
use crate::scanner::Scanner;
use crate::validation::DomainName;

/// Route of the scan endpoint.
pub const SCAN_ROUTE: &str = "/api/v1.0/cms/{domain}";

/// Path prefix in front of the domain segment of [`SCAN_ROUTE`].
const SCAN_PREFIX: &str = "/api/v1.0/cms/";

/// Header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state of the HTTP service.
#[derive(Clone)]
pub struct AppState {
    pub scanner: Arc<Scanner>,
    pub limiter: Arc<RateLimiter<IpAddr>>,
    pub api_key: ApiKey,
    /// Set when domains must resolve before they are scanned
    pub dns: Option<Arc<DnsResolver>>,
}

/// Request ID extension type.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    // route_layer: the last layer added runs first, so rate limiting
    // precedes the API key check.
    let api = Router::new()
        .route(SCAN_ROUTE, get(scan_domain))
        .route_layer(middleware::from_fn_with_state(
            state.api_key.clone(),
            require_api_key,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .map(|id| id.0.as_str())
                .unwrap_or("unknown");
            info_span!(
                "request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id,
            )
        }))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

/// Minimal health-check handler for container and load-balancer probes.
async fn health() -> StatusCode {
    StatusCode::OK
}

async fn scan_domain(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, ApiError> {
    // Path extractors refuse non-UTF-8 segments; validation needs raw bytes.
    let Some(raw) = domain_segment(uri.path()) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let bytes: Vec<u8> = percent_decode_str(raw).collect();

    let domain = DomainName::parse(&bytes).map_err(|err| {
        info!(
            domain = %escape_untrusted(&bytes),
            offset = ?err.offset(),
            reason = %err,
            "rejected domain"
        );
        err
    })?;

    if let Some(dns) = &state.dns {
        if let Err(err) = dns.resolve(&domain).await {
            warn!(%domain, error = %err, "domain does not resolve");
            return Err(ApiError::Unresolvable(err.to_string()));
        }
    }

    let report = state.scanner.scan(&domain).await.map_err(|err| {
        warn!(%domain, error = %err, "scan failed");
        err
    })?;

    Ok(Json(report).into_response())
}

/// Raw, still percent-encoded domain segment of a scan request path.
fn domain_segment(path: &str) -> Option<&str> {
    path.strip_prefix(SCAN_PREFIX)
        .filter(|segment| !segment.contains('/'))
}

/// Middleware that assigns every request an ID, echoed in the response.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 64 && v.bytes().all(|b| b.is_ascii_graphic()))
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Middleware enforcing the per-client request budget.
///
/// Clients are keyed by peer IP address. Requests that arrive without
/// connection info (in-process callers) share a single bucket.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter<IpAddr>>>,
    request: Request,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    match limiter.check(&client) {
        Ok(status) => {
            let mut response = next.run(request).await;
            insert_rate_limit_headers(
                response.headers_mut(),
                status.limit,
                status.remaining,
                status.reset_after,
            );
            response
        }
        Err(exceeded) => {
            info!(%client, limit = exceeded.limit, "rate limit exceeded");
            let mut response = ApiError::RateLimited(exceeded).into_response();
            insert_rate_limit_headers(
                response.headers_mut(),
                exceeded.limit,
                0,
                exceeded.retry_after,
            );
            response
        }
    }
}

fn insert_rate_limit_headers(
    headers: &mut HeaderMap,
    limit: u32,
    remaining: u32,
    reset_after: Duration,
) {
    let reset_at = SystemTime::now()
        .checked_add(reset_after)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_default();

    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at));
}

/// Binds `addr` and serves `state` until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {addr}"))?;
    serve_on(listener, state, shutdown_signal()).await
}

/// Serves `state` on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().context("listener has no local address")?;

    let limiter = state.limiter.clone();
    let pruner = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.prune_idle();
        }
    });

    info!("cmsgate ready on http://{local_addr}");

    let app = router(state);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("HTTP server error");

    pruner.abort();
    info!("cmsgate shut down");
    result
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
