use crate::error::ProxyError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

// Message-substring mapping, checked in precedence order. Upstream error
// text is the ground truth here; the kind is not re-consulted.
pub fn status_for_message(message: &str) -> StatusCode {
    let lower = message.to_ascii_lowercase();

    if lower.contains("all accounts failed") || lower.contains("unhealthy") {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if lower.contains("exhausted") || lower.contains("no available accounts") {
        return StatusCode::TOO_MANY_REQUESTS;
    }
    if lower.contains("socket hang up")
        || lower.contains("econnreset")
        || lower.contains("eai_again")
        || lower.contains("secure tls connection")
        || lower.contains("network socket disconnected")
    {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if lower.contains("401") || lower.contains("unauthorized") {
        return StatusCode::UNAUTHORIZED;
    }
    if lower.contains("403") || lower.contains("forbidden") {
        return StatusCode::FORBIDDEN;
    }
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota") {
        return StatusCode::TOO_MANY_REQUESTS;
    }
    if lower.contains("503") || lower.contains("service unavailable") {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if lower.contains("502") || lower.contains("bad gateway") {
        return StatusCode::BAD_GATEWAY;
    }
    if lower.contains("504") || lower.contains("timeout") {
        return StatusCode::GATEWAY_TIMEOUT;
    }
    StatusCode::INTERNAL_SERVER_ERROR
}

fn claude_error_type(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        429 => "rate_limit_error",
        _ => "api_error",
    }
}

pub fn claude_error_response(err: &ProxyError) -> Response {
    let status = status_for_message(&err.message);
    (
        status,
        Json(json!({
            "type": "error",
            "error": {
                "type": claude_error_type(status),
                "message": err.message
            }
        })),
    )
        .into_response()
}

pub fn openai_error_response(err: &ProxyError) -> Response {
    let status = status_for_message(&err.message);
    (
        status,
        Json(json!({
            "error": {
                "message": err.message,
                "type": "upstream_error",
                "code": status.as_u16()
            }
        })),
    )
        .into_response()
}

pub fn gemini_error_response(err: &ProxyError) -> Response {
    let status = status_for_message(&err.message);
    (
        status,
        Json(json!({
            "error": {
                "code": status.as_u16(),
                "message": err.message,
                "status": "UPSTREAM_ERROR"
            }
        })),
    )
        .into_response()
}
