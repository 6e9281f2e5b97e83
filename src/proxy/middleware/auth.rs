use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

// Folds over the longer of the two keys so a mismatch at byte 0 costs the
// same as a mismatch at the last byte; an early return would let timing
// reveal how much of the key prefix was right.
fn matches_expected_key(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    let len = provided.len().max(expected.len());
    let mismatch = (0..len).fold(provided.len() ^ expected.len(), |acc, i| {
        let p = provided.get(i).copied().unwrap_or(0);
        let e = expected.get(i).copied().unwrap_or(0);
        acc | usize::from(p ^ e)
    });

    mismatch == 0
}

// First non-empty trimmed value wins when a header appears more than once.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    header_value(headers, header::AUTHORIZATION.as_str())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
        .or_else(|| header_value(headers, "x-api-key"))
        .or_else(|| header_value(headers, "x-goog-api-key"))
}

fn unauthorized_response(path: &str) -> Response {
    if path.starts_with("/v1/messages") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "type": "error",
                "error": { "type": "api_error", "message": "Invalid or missing API key" }
            })),
        )
            .into_response();
    }
    if path.starts_with("/v1beta") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "code": 401,
                    "message": "API key not valid. Please pass a valid API key.",
                    "status": "UNAUTHENTICATED"
                }
            })),
        )
            .into_response();
    }
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": {
                "message": "Incorrect API key provided.",
                "type": "invalid_request_error",
                "code": "invalid_api_key"
            }
        })),
    )
        .into_response()
}

// Request gate: with no configured key everything passes; otherwise any of
// the three accepted headers must match.
pub async fn auth_middleware(
    State(api_key): State<Arc<RwLock<String>>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if request.method() == axum::http::Method::OPTIONS
        || path == "/health"
        || path == "/healthz"
    {
        return next.run(request).await;
    }

    let expected = api_key.read().await.clone();
    if expected.is_empty() {
        return next.run(request).await;
    }

    match extract_api_key(request.headers()) {
        Some(provided) if matches_expected_key(provided, &expected) => next.run(request).await,
        _ => {
            tracing::warn!("Rejected request to {} with missing or invalid API key", path);
            unauthorized_response(&path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn key_comparison_matches_and_rejects() {
        assert!(matches_expected_key("abc123", "abc123"));
        assert!(!matches_expected_key("abc123", "abc124"));
        assert!(!matches_expected_key("abc123", "abc1234"));
        assert!(!matches_expected_key("", "x"));
        assert!(matches_expected_key("", ""));
    }

    #[test]
    fn api_key_extraction_order_and_bearer_strip() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-1"));
        headers.insert("x-api-key", HeaderValue::from_static("sk-2"));
        assert_eq!(extract_api_key(&headers), Some("sk-1"));

        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_static("sk-goog"));
        assert_eq!(extract_api_key(&headers), Some("sk-goog"));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("raw-key"));
        assert_eq!(extract_api_key(&headers), Some("raw-key"));
    }

    #[test]
    fn repeated_headers_use_first_non_empty_value() {
        let mut headers = HeaderMap::new();
        headers.append("x-api-key", HeaderValue::from_static("  "));
        headers.append("x-api-key", HeaderValue::from_static(" real-key "));
        assert_eq!(extract_api_key(&headers), Some("real-key"));
    }

    #[test]
    fn missing_headers_yield_none() {
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }
}
