use crate::proxy::mappers::claude::models::V1InternalRequest;
use serde_json::{json, Map, Value};

// Wraps a public Gemini generateContent body into the internal envelope.
// Only `contents`, `generationConfig` and text system parts survive; the
// rest of the public surface has no internal counterpart.
pub fn wrap_request(body: &Value, project_id: &str, mapped_model: &str) -> Value {
    let mut request = Map::new();

    request.insert(
        "contents".to_string(),
        body.get("contents").cloned().unwrap_or_else(|| json!([])),
    );

    if let Some(config) = body.get("generationConfig") {
        if config.is_object() {
            request.insert("generationConfig".to_string(), config.clone());
        }
    }

    if let Some(system) = body.get("systemInstruction").or_else(|| body.get("system_instruction")) {
        if let Some(parts) = system.get("parts").and_then(|p| p.as_array()) {
            let text_parts: Vec<Value> = parts
                .iter()
                .filter(|p| p.get("text").and_then(|t| t.as_str()).is_some())
                .cloned()
                .collect();
            if !text_parts.is_empty() {
                request.insert(
                    "systemInstruction".to_string(),
                    json!({ "role": "user", "parts": text_parts }),
                );
            }
        }
    }

    if let Some(tools) = body.get("tools") {
        if tools.is_array() {
            request.insert("tools".to_string(), tools.clone());
        }
    }

    let envelope = V1InternalRequest {
        project: project_id.to_string(),
        request_id: format!("agent-{}", uuid::Uuid::new_v4()),
        request: Value::Object(request),
        model: mapped_model.to_string(),
        user_agent: "antigravity".to_string(),
        request_type: "generate-content".to_string(),
    };

    serde_json::to_value(envelope).unwrap_or_else(|_| json!({}))
}

// The internal endpoint sometimes wraps the unary payload as
// {"response": {...}}.
pub fn unwrap_response(response: &Value) -> Value {
    response.get("response").unwrap_or(response).clone()
}
