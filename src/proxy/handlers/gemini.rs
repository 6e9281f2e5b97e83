use super::errors::gemini_error_response;
use super::{account_headers, sse_response};
use crate::proxy::common::model_mapping::all_dynamic_models;
use crate::proxy::state::{AppState, ModelCatalogState};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use tracing::info;

fn model_entry(id: &str) -> Value {
    json!({
        "name": format!("models/{}", id),
        "displayName": id,
        "supportedGenerationMethods": ["generateContent", "streamGenerateContent", "countTokens"]
    })
}

pub async fn handle_list_models(State(state): State<ModelCatalogState>) -> Response {
    let mapping = state.custom_mapping.read().await;
    let models: Vec<Value> = all_dynamic_models(&mapping)
        .iter()
        .map(|id| model_entry(id))
        .collect();
    Json(json!({ "models": models })).into_response()
}

pub async fn handle_get_model(Path(model): Path<String>) -> Response {
    let model = model.strip_prefix("models/").unwrap_or(&model).to_string();
    Json(model_entry(&model)).into_response()
}

// Combined `{model}:{action}` route; a bare model name defaults to
// generateContent.
pub async fn handle_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let (model, action) = match model_action.rsplit_once(':') {
        Some((m, a)) => (m.to_string(), a.to_string()),
        None => (model_action, "generateContent".to_string()),
    };
    let model = model.strip_prefix("models/").unwrap_or(&model).to_string();

    info!("Gemini request | model: {} | action: {}", model, action);

    match action.as_str() {
        "generateContent" => match state.core.dispatcher.gemini_generate(&model, body).await {
            Ok((response, account)) => {
                (StatusCode::OK, account_headers(&account), Json(response)).into_response()
            }
            Err(err) => gemini_error_response(&err),
        },
        "streamGenerateContent" => match state.core.dispatcher.gemini_stream(&model, body).await {
            Ok((stream, account)) => sse_response(stream, Some(&account)),
            Err(err) => gemini_error_response(&err),
        },
        "countTokens" => handle_count_tokens_inner(),
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": 400,
                    "message": format!("Unsupported method: {}", other),
                    "status": "INVALID_ARGUMENT"
                }
            })),
        )
            .into_response(),
    }
}

pub async fn handle_count_tokens(
    Path(_model): Path<String>,
    Json(_body): Json<Value>,
) -> Response {
    handle_count_tokens_inner()
}

fn handle_count_tokens_inner() -> Response {
    Json(json!({ "totalTokens": 0 })).into_response()
}
