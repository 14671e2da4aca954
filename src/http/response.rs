//! Response construction.
//!
//! # Responsibilities
//! - Success responses with cache headers
//! - JSON error bodies in the shape `{"error": "...", "code": <status>}`
//!
//! The rate-limit header is attached by the handler, which stamps it on
//! every admitted request regardless of outcome.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde::Serialize;

use crate::proxy::CacheStatus;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: u16,
}

/// Build an error response with the standard JSON shape.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        error: message.into(),
        code: status.as_u16(),
    };
    (status, Json(body)).into_response()
}

/// Build a 429 with an advisory retry hint.
pub fn rate_limited_response() -> Response {
    let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
    response
}

/// Build the 200 for a proxied body, cached or fresh.
pub fn proxied_response(body: Bytes, content_type: &str, cache_status: CacheStatus) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(X_CACHE, HeaderValue::from_static(cache_status.as_str()));

    (StatusCode::OK, headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_serializes_to_expected_shape() {
        let body = ErrorBody {
            error: "missing required 'url' parameter".into(),
            code: 400,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"error":"missing required 'url' parameter","code":400}"#
        );
    }

    #[test]
    fn proxied_response_carries_cache_and_content_headers() {
        let response = proxied_response(Bytes::from_static(b"payload"), "text/plain", CacheStatus::Hit);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(X_CACHE).unwrap(), "HIT");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn rate_limited_response_advises_retry() {
        let response = rate_limited_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }
}
