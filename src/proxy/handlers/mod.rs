pub mod claude;
pub mod errors;
pub mod gemini;
pub mod openai;

use crate::proxy::dispatch::{AccountInfo, SseStream};
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};

// Standard SSE envelope; the body stream drops (and with it the upstream
// reader) as soon as the client disconnects.
pub fn sse_response(stream: SseStream, info: Option<&AccountInfo>) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no");

    if let Some(info) = info {
        if let Ok(v) = HeaderValue::from_str(&info.email) {
            builder = builder.header("X-Account-Email", v);
        }
        if let Ok(v) = HeaderValue::from_str(&info.model_used) {
            builder = builder.header("X-Mapped-Model", v);
        }
    }

    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

pub fn account_headers(info: &AccountInfo) -> [(&'static str, String); 2] {
    [
        ("X-Account-Email", info.email.clone()),
        ("X-Mapped-Model", info.model_used.clone()),
    ]
}
