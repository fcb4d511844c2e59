//! API key gate for the scan endpoint.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::error::ApiError;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// The shared secret callers must present.
#[derive(Clone)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    /// Wraps a configured key, kept exactly as given.
    ///
    /// Blank keys are refused since an empty key would match a request that
    /// carries no header at all. Keys with surrounding whitespace are refused
    /// as well.
    pub fn new(key: &str) -> anyhow::Result<Self> {
        if key.trim().is_empty() {
            anyhow::bail!("API key must not be empty");
        }
        if key.trim() != key {
            anyhow::bail!("API key must not start or end with whitespace");
        }
        Ok(Self(Arc::from(key)))
    }

    /// Compares a presented key in constant time.
    pub fn verify(&self, presented: &[u8]) -> bool {
        let expected = self.0.as_bytes();
        if presented.len() != expected.len() {
            return false;
        }
        presented.ct_eq(expected).into()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Middleware rejecting requests without a matching `X-API-KEY` header.
pub async fn require_api_key(
    State(key): State<ApiKey>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorized = request
        .headers()
        .get(API_KEY_HEADER)
        .is_some_and(|value| key.verify(value.as_bytes()));

    if !authorized {
        info!(path = %request.uri().path(), "rejected request with missing or invalid API key");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}
