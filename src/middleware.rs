use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::rate_limiter::Decision;
use crate::response::{apply_rate_limit_headers, rate_limited};

pub const REQUEST_ID: &str = "x-request-id";

/// Admission control: every request is counted against its client's
/// window before it reaches a handler.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_identity(&request, state.trust_proxy_headers);
    let decision = state.limiter.check(&client).await;

    if let Decision::Reject {
        limit,
        retry_after,
        reset_at,
    } = decision
    {
        return rate_limited(limit, retry_after, reset_at, state.limiter.window());
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_identity(&request, state.trust_proxy_headers);
    let request_id = ensure_request_id(request.headers_mut());
    let started = Instant::now();

    info!(
        target: "turnstile::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    let status = response.status();
    info!(
        target: "turnstile::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        latency_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

fn ensure_request_id(headers: &mut HeaderMap) -> String {
    if let Some(existing) = headers.get(REQUEST_ID).and_then(|v| v.to_str().ok()) {
        if !existing.is_empty() {
            return existing.to_string();
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(REQUEST_ID, value);
    }
    id
}

/// Identity used to key the client's counter.
///
/// With `trust_proxy_headers`, the first `X-Forwarded-For` hop or
/// `X-Real-IP` wins; otherwise only the socket peer address counts.
pub fn client_identity(request: &Request, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(request.headers()) {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}
