//! API error types and their HTTP responses.
//!
//! Response bodies are bare JSON strings. Clients only ever learn *that* a
//! request was rejected; the structured cause stays in the server log.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::rate_limit::RateLimitExceeded;
use crate::scanner::ScanError;
use crate::validation::ValidationError;

/// Error returned by route handlers and middleware.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The requested domain failed validation.
    #[error("invalid domain: {0}")]
    InvalidDomain(#[from] ValidationError),

    /// The domain was valid but no scan result could be produced.
    #[error("could not query domain: {0}")]
    ScanFailed(#[from] ScanError),

    /// The domain does not resolve and DNS checking is enabled.
    #[error("could not resolve domain: {0}")]
    Unresolvable(String),

    /// Missing or wrong API key.
    #[error("unauthorized")]
    Unauthorized,

    /// The client used up its request budget.
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidDomain(_) | ApiError::ScanFailed(_) | ApiError::Unresolvable(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Generic, client-facing message.
    pub fn public_message(&self) -> &'static str {
        match self {
            ApiError::InvalidDomain(_) => "invalid domain",
            ApiError::ScanFailed(_) | ApiError::Unresolvable(_) => "could not query domain",
            ApiError::Unauthorized => "unauthorized",
            ApiError::RateLimited(_) => "Limit exceeded",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(self.public_message())).into_response();

        if let ApiError::RateLimited(exceeded) = &self {
            // Round up so clients never retry a moment too early.
            let secs = exceeded.retry_after.as_secs()
                + u64::from(exceeded.retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}
