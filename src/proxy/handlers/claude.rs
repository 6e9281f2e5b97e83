use super::errors::claude_error_response;
use super::{account_headers, sse_response};
use crate::proxy::dispatch::MessagesOutcome;
use crate::proxy::mappers::claude::models::ClaudeRequest;
use crate::proxy::state::AppState;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use tracing::info;

pub async fn handle_messages(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let request: ClaudeRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "type": "error",
                    "error": {
                        "type": "invalid_request_error",
                        "message": format!("Invalid request body: {}", e)
                    }
                })),
            )
                .into_response();
        }
    };

    info!(
        "Claude request | model: {} | stream: {} | messages: {} | tools: {}",
        request.model,
        request.stream,
        request.messages.len(),
        request.tools.is_some()
    );

    match state.core.dispatcher.anthropic_messages(request).await {
        Ok(MessagesOutcome::Stream(stream, account)) => sse_response(stream, Some(&account)),
        Ok(MessagesOutcome::Unary(response, account)) => {
            info!(
                "Claude request finished | account: {} | tokens in {} out {}",
                account.email, response.usage.input_tokens, response.usage.output_tokens
            );
            (StatusCode::OK, account_headers(&account), Json(response)).into_response()
        }
        Err(err) => claude_error_response(&err),
    }
}

// Anthropic clients probe this; real counting happens upstream, so zeros
// keep them moving.
pub async fn handle_count_tokens(Json(_body): Json<Value>) -> Response {
    Json(json!({ "input_tokens": 0, "output_tokens": 0 })).into_response()
}
