use super::models::*;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

// Rewrites an Anthropic Messages request into the internal generation
// envelope. The session id deliberately never crosses this boundary; the
// internal endpoint only sees project/request/model.
pub fn transform_claude_request_in(
    claude_req: &ClaudeRequest,
    project_id: &str,
) -> Result<Value, String> {
    let mut tool_names: HashMap<String, String> = HashMap::new();
    for message in &claude_req.messages {
        if let MessageContent::Array(blocks) = &message.content {
            for block in blocks {
                if let ContentBlock::ToolUse { id, name, .. } = block {
                    tool_names.insert(id.clone(), name.clone());
                }
            }
        }
    }

    let mut contents = Vec::new();
    for message in &claude_req.messages {
        let role = match message.role.as_str() {
            "assistant" => "model",
            _ => "user",
        };
        let parts = build_parts(&message.content, &tool_names);
        if parts.is_empty() {
            continue;
        }
        contents.push(json!({ "role": role, "parts": parts }));
    }

    let mut request = Map::new();
    request.insert("contents".to_string(), Value::Array(contents));

    if let Some(system_parts) = build_system_parts(claude_req.system.as_ref()) {
        request.insert(
            "systemInstruction".to_string(),
            json!({ "role": "user", "parts": system_parts }),
        );
    }

    let generation_config = build_generation_config(claude_req);
    if !generation_config.is_empty() {
        request.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
    }

    if let Some(tools) = &claude_req.tools {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                let mut decl = Map::new();
                decl.insert("name".to_string(), json!(t.name));
                if let Some(description) = &t.description {
                    decl.insert("description".to_string(), json!(description));
                }
                decl.insert("parameters".to_string(), t.input_schema.clone());
                Value::Object(decl)
            })
            .collect();
        if !declarations.is_empty() {
            request.insert(
                "tools".to_string(),
                json!([{ "functionDeclarations": declarations }]),
            );
        }
    }

    let envelope = V1InternalRequest {
        project: project_id.to_string(),
        request_id: format!("agent-{}", uuid::Uuid::new_v4()),
        request: Value::Object(request),
        model: claude_req.model.clone(),
        user_agent: "antigravity".to_string(),
        request_type: "generate-content".to_string(),
    };

    serde_json::to_value(envelope).map_err(|e| format!("envelope serialization failed: {}", e))
}

fn build_parts(content: &MessageContent, tool_names: &HashMap<String, String>) -> Vec<Value> {
    let mut parts = Vec::new();
    match content {
        MessageContent::String(text) => {
            if !text.is_empty() {
                parts.push(json!({ "text": text }));
            }
        }
        MessageContent::Array(blocks) => {
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        if !text.is_empty() {
                            parts.push(json!({ "text": text }));
                        }
                    }
                    ContentBlock::Image { source } => {
                        if source.source_type == "base64" {
                            parts.push(json!({
                                "inlineData": {
                                    "mimeType": source.media_type,
                                    "data": source.data
                                }
                            }));
                        } else {
                            tracing::debug!(
                                "Skipping unsupported image source type: {}",
                                source.source_type
                            );
                        }
                    }
                    ContentBlock::Thinking {
                        thinking,
                        signature,
                    } => {
                        let mut part = json!({ "text": thinking, "thought": true });
                        if let Some(sig) = signature {
                            part["thoughtSignature"] = json!(sig);
                        }
                        parts.push(part);
                    }
                    ContentBlock::RedactedThinking { .. } => {
                        tracing::debug!("Dropping redacted_thinking block");
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        parts.push(json!({
                            "functionCall": {
                                "name": name,
                                "args": input,
                                "id": id
                            }
                        }));
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error: _,
                    } => {
                        let name = tool_names
                            .get(tool_use_id)
                            .cloned()
                            .unwrap_or_else(|| tool_use_id.clone());
                        let result = tool_result_text(content);
                        parts.push(json!({
                            "functionResponse": {
                                "name": name,
                                "response": { "result": result },
                                "id": tool_use_id
                            }
                        }));
                    }
                }
            }
        }
    }
    parts
}

fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(blocks) => {
            // Anthropic allows tool_result content as a block array; keep
            // the text parts.
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect();
            if texts.is_empty() {
                content.to_string()
            } else {
                texts.join("\n")
            }
        }
        other => other.to_string(),
    }
}

// System instruction carries text parts only.
fn build_system_parts(system: Option<&SystemPrompt>) -> Option<Vec<Value>> {
    let parts: Vec<Value> = match system? {
        SystemPrompt::Text(text) => {
            if text.is_empty() {
                return None;
            }
            vec![json!({ "text": text })]
        }
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } if !text.is_empty() => {
                    Some(json!({ "text": text }))
                }
                _ => None,
            })
            .collect(),
    };
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

fn build_generation_config(req: &ClaudeRequest) -> Map<String, Value> {
    let mut config = Map::new();
    if let Some(t) = req.temperature {
        config.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = req.top_p {
        config.insert("topP".to_string(), json!(p));
    }
    if let Some(k) = req.top_k {
        config.insert("topK".to_string(), json!(k));
    }
    if let Some(max) = req.max_tokens {
        config.insert("maxOutputTokens".to_string(), json!(max));
    }
    if let Some(stops) = &req.stop_sequences {
        if !stops.is_empty() {
            config.insert("stopSequences".to_string(), json!(stops));
        }
    }
    if let Some(thinking) = &req.thinking {
        if thinking.thinking_type.as_deref() == Some("enabled") {
            let mut tc = json!({ "includeThoughts": true });
            if let Some(budget) = thinking.budget_tokens {
                tc["thinkingBudget"] = json!(budget);
            }
            config.insert("thinkingConfig".to_string(), tc);
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_fixture() -> ClaudeRequest {
        serde_json::from_value(json!({
            "model": "claude-sonnet-4-5-thinking",
            "system": "You are terse.",
            "max_tokens": 1024,
            "temperature": 0.5,
            "messages": [
                { "role": "user", "content": "What is the weather in London?" },
                { "role": "assistant", "content": [
                    { "type": "text", "text": "Checking." },
                    { "type": "tool_use", "id": "toolu_1", "name": "get_weather",
                      "input": {"location": "London"} }
                ]},
                { "role": "user", "content": [
                    { "type": "tool_result", "tool_use_id": "toolu_1", "content": "rainy" }
                ]}
            ],
            "tools": [
                { "name": "get_weather", "description": "Look up weather",
                  "input_schema": {"type": "object", "properties": {"location": {"type": "string"}}} }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn envelope_shape_and_roles() {
        let body = transform_claude_request_in(&request_fixture(), "proj-1").unwrap();

        assert_eq!(body["project"], "proj-1");
        assert_eq!(body["model"], "claude-sonnet-4-5-thinking");
        assert_eq!(body["userAgent"], "antigravity");
        assert_eq!(body["requestType"], "generate-content");
        assert!(body["requestId"].as_str().unwrap().starts_with("agent-"));

        let contents = body["request"]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");

        let fc = &contents[1]["parts"][1]["functionCall"];
        assert_eq!(fc["name"], "get_weather");
        assert_eq!(fc["id"], "toolu_1");

        let fr = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(fr["name"], "get_weather");
        assert_eq!(fr["response"]["result"], "rainy");
    }

    #[test]
    fn session_id_never_reaches_the_internal_payload() {
        let mut req = request_fixture();
        req.metadata = Some(json!({"session_id": "sess-123", "user_id": "u-1"}));
        let body = transform_claude_request_in(&req, "proj-1").unwrap();
        let serialized = serde_json::to_string(&body).unwrap();
        assert!(!serialized.contains("sess-123"));
        assert!(!serialized.contains("sessionId"));
        assert!(!serialized.contains("session_id"));
    }

    #[test]
    fn system_instruction_is_text_only() {
        let mut req = request_fixture();
        req.system = Some(SystemPrompt::Blocks(vec![
            ContentBlock::Text {
                text: "Be brief.".to_string(),
            },
            ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".to_string(),
                    media_type: "image/png".to_string(),
                    data: "aGk=".to_string(),
                },
            },
        ]));
        let body = transform_claude_request_in(&req, "").unwrap();
        let parts = body["request"]["systemInstruction"]["parts"]
            .as_array()
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "Be brief.");
    }

    #[test]
    fn generation_config_and_tools() {
        let body = transform_claude_request_in(&request_fixture(), "").unwrap();
        let config = &body["request"]["generationConfig"];
        assert_eq!(config["temperature"], 0.5);
        assert_eq!(config["maxOutputTokens"], 1024);

        let decls = body["request"]["tools"][0]["functionDeclarations"]
            .as_array()
            .unwrap();
        assert_eq!(decls[0]["name"], "get_weather");
        assert!(decls[0]["parameters"]["properties"]["location"].is_object());
    }

    #[test]
    fn thinking_blocks_become_thought_parts() {
        let req: ClaudeRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-5-thinking",
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [
                { "role": "assistant", "content": [
                    { "type": "thinking", "thinking": "hmm", "signature": "c2ln" },
                    { "type": "redacted_thinking", "data": "xxxx" },
                    { "type": "text", "text": "done" }
                ]}
            ]
        }))
        .unwrap();

        let body = transform_claude_request_in(&req, "").unwrap();
        let parts = body["request"]["contents"][0]["parts"].as_array().unwrap();
        // redacted_thinking is dropped
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["thought"], true);
        assert_eq!(parts[0]["thoughtSignature"], "c2ln");
        assert_eq!(
            body["request"]["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            2048
        );
    }

    #[test]
    fn image_blocks_become_inline_data() {
        let req: ClaudeRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                { "role": "user", "content": [
                    { "type": "image", "source": {
                        "type": "base64", "media_type": "image/jpeg", "data": "Zm9v" } },
                    { "type": "text", "text": "what is this?" }
                ]}
            ]
        }))
        .unwrap();

        let body = transform_claude_request_in(&req, "").unwrap();
        let parts = body["request"]["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inlineData"]["data"], "Zm9v");
    }
}
