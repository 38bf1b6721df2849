use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the counter store.
///
/// The rate limiter treats every variant the same way: the request is
/// admitted without metering.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("counter store connection error: {0}")]
    Connection(String),

    #[error("counter store command failed: {0}")]
    Command(String),

    #[error("counter store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed counter value at {key}: {value:?}")]
    MalformedValue { key: String, value: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Process-level errors: startup, configuration and serving.
#[derive(Debug, Error)]
pub enum TurnstileError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TurnstileError>;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        let resp = ApiError::NotFound("Todo not found".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ApiError::BadRequest("Invalid todo Id".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::MalformedValue {
            key: "rate_limit:1.2.3.4".into(),
            value: "abc".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed counter value at rate_limit:1.2.3.4: \"abc\""
        );

        let err = StoreError::Timeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "counter store call timed out after 3s");
    }
}
