use super::errors::openai_error_response;
use super::{account_headers, sse_response};
use crate::constants;
use crate::error::ProxyError;
use crate::proxy::common::model_mapping::{all_dynamic_models, MODEL_GEMINI_3_PRO_IMAGE};
use crate::proxy::dispatch::ChatOutcome;
use crate::proxy::mappers::openai::models::OpenAIRequest;
use crate::proxy::state::{AppState, ModelCatalogState};
use axum::{
    extract::{Json, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use base64::Engine;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

fn invalid_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": {
                "message": message.into(),
                "type": "invalid_request_error",
                "code": "invalid_request"
            }
        })),
    )
        .into_response()
}

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let request: OpenAIRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => return invalid_request(format!("Invalid request body: {}", e)),
    };

    info!(
        "OpenAI chat request | model: {} | stream: {} | messages: {}",
        request.model,
        request.stream,
        request.messages.len()
    );

    dispatch_chat(&state, request).await
}

async fn dispatch_chat(state: &AppState, request: OpenAIRequest) -> Response {
    match state.core.dispatcher.chat_completions(request).await {
        Ok(ChatOutcome::Stream(stream, account)) => sse_response(stream, Some(&account)),
        Ok(ChatOutcome::Unary(response, account)) => {
            (StatusCode::OK, account_headers(&account), Json(response)).into_response()
        }
        Err(err) => openai_error_response(&err),
    }
}

// Legacy /v1/completions: prompt in, text_completion out.
pub async fn handle_completions(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("gpt-3.5-turbo")
        .to_string();
    let prompt_text = match body.get("prompt") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    if prompt_text.is_empty() {
        return invalid_request("Missing 'prompt' field");
    }

    let mut chat_body = Map::new();
    chat_body.insert("model".to_string(), json!(model));
    chat_body.insert(
        "messages".to_string(),
        json!([{ "role": "user", "content": prompt_text }]),
    );
    for key in ["stream", "max_tokens", "temperature", "top_p", "stop", "extra"] {
        if let Some(v) = body.get(key) {
            chat_body.insert(key.to_string(), v.clone());
        }
    }
    let request: OpenAIRequest = match serde_json::from_value(Value::Object(chat_body)) {
        Ok(r) => r,
        Err(e) => return invalid_request(format!("Invalid request body: {}", e)),
    };

    match state.core.dispatcher.chat_completions(request).await {
        Ok(ChatOutcome::Stream(stream, account)) => sse_response(stream, Some(&account)),
        Ok(ChatOutcome::Unary(response, account)) => {
            let choice = response.choices.first();
            let text = choice
                .and_then(|c| c.message.content.as_ref())
                .map(|c| c.joined_text())
                .unwrap_or_default();
            let finish_reason = choice.and_then(|c| c.finish_reason.clone());
            let legacy = json!({
                "id": format!("cmpl-{}", uuid::Uuid::new_v4()),
                "object": "text_completion",
                "created": response.created,
                "model": model,
                "choices": [{
                    "text": text,
                    "index": 0,
                    "logprobs": null,
                    "finish_reason": finish_reason
                }],
                "usage": response.usage
            });
            (StatusCode::OK, account_headers(&account), Json(legacy)).into_response()
        }
        Err(err) => openai_error_response(&err),
    }
}

// /v1/responses: flatten the `input` item list into chat messages,
// reconstructing assistant tool calls and tool results by call_id.
pub async fn handle_responses(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    if model.is_empty() {
        return invalid_request("Missing 'model' field");
    }

    let mut messages: Vec<Value> = Vec::new();
    if let Some(instructions) = body.get("instructions").and_then(|v| v.as_str()) {
        if !instructions.is_empty() {
            messages.push(json!({ "role": "system", "content": instructions }));
        }
    }

    match body.get("input") {
        Some(Value::String(text)) => {
            messages.push(json!({ "role": "user", "content": text }));
        }
        Some(Value::Array(items)) => {
            // First pass: learn which tool name each call_id belongs to.
            let mut call_id_to_name = std::collections::HashMap::new();
            for item in items {
                if item.get("type").and_then(|v| v.as_str()) == Some("function_call") {
                    if let (Some(call_id), Some(name)) = (
                        item.get("call_id").and_then(|v| v.as_str()),
                        item.get("name").and_then(|v| v.as_str()),
                    ) {
                        call_id_to_name.insert(call_id.to_string(), name.to_string());
                        debug!("Mapped call_id {} to tool {}", call_id, name);
                    }
                }
            }

            for item in items {
                match item.get("type").and_then(|v| v.as_str()) {
                    Some("message") | None => {
                        let role = item
                            .get("role")
                            .and_then(|v| v.as_str())
                            .unwrap_or("user");
                        let content = match item.get("content") {
                            Some(Value::String(s)) => s.clone(),
                            Some(Value::Array(parts)) => parts
                                .iter()
                                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                                .collect::<Vec<_>>()
                                .join("\n"),
                            _ => item.as_str().unwrap_or_default().to_string(),
                        };
                        if !content.is_empty() {
                            messages.push(json!({ "role": role, "content": content }));
                        }
                    }
                    Some("function_call") => {
                        let call_id = item
                            .get("call_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("call_unknown");
                        let name = item.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
                        let arguments = item
                            .get("arguments")
                            .and_then(|v| v.as_str())
                            .unwrap_or("{}");
                        messages.push(json!({
                            "role": "assistant",
                            "tool_calls": [{
                                "id": call_id,
                                "type": "function",
                                "function": { "name": name, "arguments": arguments }
                            }]
                        }));
                    }
                    Some("function_call_output") => {
                        let call_id = item
                            .get("call_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("call_unknown");
                        let output = match item.get("output") {
                            Some(Value::String(s)) => s.clone(),
                            Some(other) => other.to_string(),
                            None => String::new(),
                        };
                        let name = call_id_to_name
                            .get(call_id)
                            .cloned()
                            .unwrap_or_else(|| "unknown".to_string());
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": call_id,
                            "name": name,
                            "content": output
                        }));
                    }
                    Some(other) => {
                        debug!("Skipping unsupported responses input item type: {}", other);
                    }
                }
            }
        }
        _ => {}
    }

    if messages.is_empty() {
        return invalid_request("Request carries no usable input");
    }

    let mut chat_body = Map::new();
    chat_body.insert("model".to_string(), json!(model));
    chat_body.insert("messages".to_string(), Value::Array(messages));
    for key in ["stream", "max_tokens", "temperature", "top_p", "tools", "extra"] {
        if let Some(v) = body.get(key) {
            chat_body.insert(key.to_string(), v.clone());
        }
    }
    let request: OpenAIRequest = match serde_json::from_value(Value::Object(chat_body)) {
        Ok(r) => r,
        Err(e) => return invalid_request(format!("Invalid request body: {}", e)),
    };

    dispatch_chat(&state, request).await
}

fn require_multipart(headers: &HeaderMap) -> Result<(), Response> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("multipart/form-data") || !content_type.contains("boundary=") {
        return Err(invalid_request(
            "Content-Type must be multipart/form-data with a boundary",
        ));
    }
    Ok(())
}

fn image_response_from_gemini(
    response: &crate::proxy::mappers::claude::models::GeminiResponse,
) -> Option<Value> {
    let images: Vec<Value> = response
        .first_parts()
        .iter()
        .filter_map(|p| p.inline_data.as_ref())
        .map(|img| json!({ "b64_json": img.data }))
        .collect();
    if images.is_empty() {
        return None;
    }
    Some(json!({
        "created": chrono::Utc::now().timestamp(),
        "data": images
    }))
}

pub async fn handle_images_generations(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let prompt = body
        .get("prompt")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if prompt.is_empty() {
        return invalid_request("Missing 'prompt' field");
    }
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or(MODEL_GEMINI_3_PRO_IMAGE);

    let gemini_body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
    });

    match state.core.dispatcher.gemini_generate(model, gemini_body).await {
        Ok((response, account)) => match image_response_from_gemini(&response) {
            Some(images) => (StatusCode::OK, account_headers(&account), Json(images)).into_response(),
            None => openai_error_response(&ProxyError::new(
                crate::error::ErrorKind::Fatal,
                "Upstream returned no image data",
            )),
        },
        Err(err) => openai_error_response(&err),
    }
}

pub async fn handle_images_edits(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if let Err(resp) = require_multipart(&headers) {
        return resp;
    }

    let mut prompt = String::new();
    let mut model = MODEL_GEMINI_3_PRO_IMAGE.to_string();
    let mut image_parts: Vec<Value> = Vec::new();

    let mut multipart = multipart;
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => prompt = field.text().await.unwrap_or_default(),
            "model" => {
                let value = field.text().await.unwrap_or_default();
                if !value.is_empty() {
                    model = value;
                }
            }
            "image" | "image[]" => {
                let mime = field
                    .content_type()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "image/png".to_string());
                if let Ok(bytes) = field.bytes().await {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    image_parts.push(json!({
                        "inlineData": { "mimeType": mime, "data": encoded }
                    }));
                }
            }
            _ => {}
        }
    }

    if prompt.is_empty() {
        return invalid_request("Missing 'prompt' field");
    }
    if image_parts.is_empty() {
        return invalid_request("Missing 'image' field");
    }

    let mut parts = vec![json!({ "text": prompt })];
    parts.extend(image_parts);
    let gemini_body = json!({ "contents": [{ "role": "user", "parts": parts }] });

    match state.core.dispatcher.gemini_generate(&model, gemini_body).await {
        Ok((response, account)) => match image_response_from_gemini(&response) {
            Some(images) => (StatusCode::OK, account_headers(&account), Json(images)).into_response(),
            None => openai_error_response(&ProxyError::new(
                crate::error::ErrorKind::Fatal,
                "Upstream returned no image data",
            )),
        },
        Err(err) => openai_error_response(&err),
    }
}

pub async fn handle_audio_transcriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    if let Err(resp) = require_multipart(&headers) {
        return resp;
    }

    let mut prompt = "Transcribe this audio.".to_string();
    let mut model = "gemini-2.5-flash".to_string();
    let mut audio: Option<(String, String)> = None;

    let mut multipart = multipart;
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => {
                let value = field.text().await.unwrap_or_default();
                if !value.is_empty() {
                    prompt = value;
                }
            }
            "model" => {
                let value = field.text().await.unwrap_or_default();
                if !value.is_empty() {
                    model = value;
                }
            }
            "file" => {
                let mime = field
                    .content_type()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "audio/mpeg".to_string());
                if let Ok(bytes) = field.bytes().await {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    audio = Some((mime, encoded));
                }
            }
            _ => {}
        }
    }

    let Some((mime, data)) = audio else {
        return invalid_request("Missing 'file' field");
    };

    let gemini_body = json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "text": prompt },
                { "inlineData": { "mimeType": mime, "data": data } }
            ]
        }]
    });

    match state.core.dispatcher.gemini_generate(&model, gemini_body).await {
        Ok((response, account)) => {
            let text: String = response
                .first_parts()
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect();
            (
                StatusCode::OK,
                account_headers(&account),
                Json(json!({ "text": text })),
            )
                .into_response()
        }
        Err(err) => openai_error_response(&err),
    }
}

pub async fn handle_list_models(State(state): State<ModelCatalogState>) -> Response {
    let mapping = state.custom_mapping.read().await;
    let data: Vec<Value> = all_dynamic_models(&mapping)
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": constants::MODELS_CREATED_AT,
                "owned_by": constants::MODELS_OWNED_BY
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data })).into_response()
}
