use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;

use crate::rate_limiter::Decision;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a 429 response.
#[derive(Debug, Serialize)]
pub struct RateLimitExceeded {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

impl RateLimitExceeded {
    pub fn new(limit: u64, window: Duration, retry_after: u64) -> Self {
        Self {
            error: "Rate limit exceeded".to_string(),
            message: format!("Too many requests. Limit: {} per {:?}", limit, window),
            retry_after,
        }
    }
}

/// Write the `X-RateLimit-*` headers for a decision. Unmetered requests
/// get none.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    let (limit, remaining, reset_at) = match *decision {
        Decision::Admit {
            limit,
            remaining,
            reset_at,
        } => (limit, remaining, reset_at),
        Decision::Reject {
            limit, reset_at, ..
        } => (limit, 0, Some(reset_at)),
        Decision::Unmetered => return,
    };

    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    if let Some(reset_at) = reset_at {
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset_at));
    }
}

/// The short-circuit response for a rejected request.
pub fn rate_limited(limit: u64, retry_after: u64, reset_at: u64, window: Duration) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RateLimitExceeded::new(limit, window, retry_after)),
    )
        .into_response();
    apply_rate_limit_headers(
        response.headers_mut(),
        &Decision::Reject {
            limit,
            retry_after,
            reset_at,
        },
    );
    response
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: "server is running".to_string(),
        }
    }
}
