use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::platform::Platform;
use crate::resolver::ResolveError;

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    details: String,
}

/// Request-scoped failure rendered as `{success: false, error, details}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub details: String,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, details: impl Into<String>) -> Self {
        Self {
            status,
            code,
            details: details.into(),
            retry_after_seconds: None,
        }
    }

    pub fn empty_url() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "EMPTY_URL", "URL parameter is required")
    }

    pub fn invalid_url(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_URL", details)
    }

    pub fn invalid_query(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_QUERY", details)
    }

    pub fn no_direct_url(platform: Platform) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NO_DIRECT_URL",
            format!("No direct stream available. {}", platform.no_stream_hint()),
        )
    }

    pub fn format_not_found(format_id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "FORMAT_NOT_FOUND",
            format!("Format {format_id} is not available as a direct stream"),
        )
    }

    pub fn upstream(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", details)
    }

    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self {
            retry_after_seconds: Some(retry_after_seconds),
            ..Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many requests. Please try again later.",
            )
        }
    }

    pub fn not_found_route() -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found")
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        let status = match &e {
            ResolveError::NotFound(_) => StatusCode::NOT_FOUND,
            ResolveError::AuthRequired(_) | ResolveError::Forbidden(_) => StatusCode::FORBIDDEN,
            ResolveError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, "FAILED_TO_FETCH", e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            success: false,
            error: self.code,
            details: self.details,
        });

        let mut response = (self.status, body).into_response();
        if let Some(seconds) = self.retry_after_seconds {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
