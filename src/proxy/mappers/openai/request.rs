use super::models::*;
use crate::proxy::common::utils::generate_random_id;
use crate::proxy::mappers::claude::models::{
    ClaudeRequest, ClaudeTool, ContentBlock, ImageSource, Message, MessageContent, SystemPrompt,
};
use serde_json::{json, Value};

// OpenAI Chat Completions → Anthropic Messages. System messages collapse
// into one system string; tool messages become tool_result user turns;
// assistant tool_calls become tool_use blocks on the same message.
pub fn transform_openai_to_claude(request: &OpenAIRequest) -> ClaudeRequest {
    let system_text: Vec<String> = request
        .messages
        .iter()
        .filter(|m| m.role == "system" || m.role == "developer")
        .filter_map(|m| m.content.as_ref().map(|c| c.joined_text()))
        .filter(|s| !s.is_empty())
        .collect();

    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role.as_str() {
            "system" | "developer" => continue,
            "tool" | "function" => {
                let tool_use_id = message
                    .tool_call_id
                    .clone()
                    .unwrap_or_else(|| format!("toolu_{}", generate_random_id()));
                let content = message
                    .content
                    .as_ref()
                    .map(|c| c.joined_text())
                    .unwrap_or_default();
                messages.push(Message {
                    role: "user".to_string(),
                    content: MessageContent::Array(vec![ContentBlock::ToolResult {
                        tool_use_id,
                        content: Value::String(content),
                        is_error: None,
                    }]),
                });
            }
            role => {
                let mut blocks = content_blocks(message.content.as_ref());
                if role == "assistant" {
                    if let Some(tool_calls) = &message.tool_calls {
                        for call in tool_calls {
                            let input = serde_json::from_str::<Value>(&call.function.arguments)
                                .unwrap_or_else(|_| json!({}));
                            blocks.push(ContentBlock::ToolUse {
                                id: call.id.clone(),
                                name: call.function.name.clone(),
                                input,
                            });
                        }
                    }
                }
                if blocks.is_empty() {
                    continue;
                }
                let claude_role = if role == "assistant" { "assistant" } else { "user" };
                messages.push(Message {
                    role: claude_role.to_string(),
                    content: MessageContent::Array(blocks),
                });
            }
        }
    }

    let mut metadata = match &request.extra {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => json!({}),
    };
    metadata["source"] = json!("openai");

    ClaudeRequest {
        model: request.model.clone(),
        messages,
        system: if system_text.is_empty() {
            None
        } else {
            Some(SystemPrompt::Text(system_text.join("\n")))
        },
        stream: request.stream,
        max_tokens: request.max_tokens.or(request.max_completion_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: stop_sequences(request.stop.as_ref()),
        tools: request.tools.as_ref().map(|tools| {
            tools.iter().filter_map(claude_tool_from_openai).collect()
        }),
        tool_choice: None,
        thinking: None,
        metadata: Some(metadata),
    }
}

fn content_blocks(content: Option<&OpenAIContent>) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    match content {
        None => {}
        Some(OpenAIContent::String(s)) => {
            if !s.is_empty() {
                blocks.push(ContentBlock::Text { text: s.clone() });
            }
        }
        Some(OpenAIContent::Array(parts)) => {
            for part in parts {
                match part {
                    OpenAIContentBlock::Text { text } => {
                        if !text.is_empty() {
                            blocks.push(ContentBlock::Text { text: text.clone() });
                        }
                    }
                    OpenAIContentBlock::ImageUrl { image_url } => {
                        blocks.push(image_block(&image_url.url));
                    }
                }
            }
        }
    }
    blocks
}

// data: URIs decode into image blocks; anything else survives as a
// textual note so the model still sees the reference.
fn image_block(url: &str) -> ContentBlock {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some(comma) = rest.find(',') {
            let header = &rest[..comma];
            if header.ends_with(";base64") {
                let media_type = header.trim_end_matches(";base64");
                return ContentBlock::Image {
                    source: ImageSource {
                        source_type: "base64".to_string(),
                        media_type: media_type.to_string(),
                        data: rest[comma + 1..].to_string(),
                    },
                };
            }
        }
    }
    ContentBlock::Text {
        text: format!("[image_url] {}", url),
    }
}

fn stop_sequences(stop: Option<&Value>) -> Option<Vec<String>> {
    match stop? {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(arr) => {
            let stops: Vec<String> = arr
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
            if stops.is_empty() {
                None
            } else {
                Some(stops)
            }
        }
        _ => None,
    }
}

// OpenAI wraps tool declarations in {"type":"function","function":{...}};
// Claude wants them flat.
fn claude_tool_from_openai(tool: &Value) -> Option<ClaudeTool> {
    let inner = tool.get("function").unwrap_or(tool);
    let name = inner.get("name")?.as_str()?.to_string();
    Some(ClaudeTool {
        name,
        description: inner
            .get("description")
            .and_then(|d| d.as_str())
            .map(|s| s.to_string()),
        input_schema: inner
            .get("parameters")
            .or_else(|| inner.get("input_schema"))
            .cloned()
            .unwrap_or_else(|| json!({"type": "object"})),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_fixture() -> OpenAIRequest {
        serde_json::from_value(json!({
            "model": "gpt-4o",
            "stream": false,
            "max_tokens": 512,
            "stop": ["END"],
            "messages": [
                {"role": "system", "content": "Be helpful."},
                {"role": "developer", "content": "Answer in English."},
                {"role": "user", "content": "What's the weather in Paris?"},
                {"role": "assistant", "content": "Let me check.", "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "sunny"}
            ],
            "tools": [
                {"type": "function", "function": {
                    "name": "get_weather",
                    "description": "Weather lookup",
                    "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
                }}
            ],
            "extra": {"session_id": "s-1"}
        }))
        .unwrap()
    }

    #[test]
    fn system_messages_join_with_newlines() {
        let claude = transform_openai_to_claude(&request_fixture());
        match claude.system.unwrap() {
            SystemPrompt::Text(text) => {
                assert_eq!(text, "Be helpful.\nAnswer in English.");
            }
            _ => panic!("expected text system prompt"),
        }
    }

    #[test]
    fn tool_round_trip_preserves_semantic_shape() {
        let claude = transform_openai_to_claude(&request_fixture());
        assert_eq!(claude.messages.len(), 3);

        // Assistant turn: text + tool_use on the same message.
        let MessageContent::Array(blocks) = &claude.messages[1].content else {
            panic!("expected block content");
        };
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "Let me check."));
        match &blocks[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "get_weather");
                assert_eq!(input["city"], "Paris");
            }
            other => panic!("expected tool_use, got {:?}", other),
        }

        // Tool turn: user message holding one tool_result keyed by call id.
        assert_eq!(claude.messages[2].role, "user");
        let MessageContent::Array(blocks) = &claude.messages[2].content else {
            panic!("expected block content");
        };
        match &blocks[0] {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                assert_eq!(tool_use_id, "call_1");
                assert_eq!(content.as_str(), Some("sunny"));
            }
            other => panic!("expected tool_result, got {:?}", other),
        }
    }

    #[test]
    fn tools_are_unwrapped_and_metadata_tagged() {
        let claude = transform_openai_to_claude(&request_fixture());
        let tools = claude.tools.unwrap();
        assert_eq!(tools[0].name, "get_weather");
        assert_eq!(tools[0].description.as_deref(), Some("Weather lookup"));
        assert!(tools[0].input_schema["properties"]["city"].is_object());

        let metadata = claude.metadata.unwrap();
        assert_eq!(metadata["source"], "openai");
        assert_eq!(metadata["session_id"], "s-1");
        assert_eq!(claude.stop_sequences.unwrap(), vec!["END"]);
    }

    #[test]
    fn data_uri_images_become_image_blocks() {
        let req: OpenAIRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,aWNvbg=="}},
                {"type": "image_url", "image_url": {"url": "https://example.com/a.png"}}
            ]}]
        }))
        .unwrap();

        let claude = transform_openai_to_claude(&req);
        let MessageContent::Array(blocks) = &claude.messages[0].content else {
            panic!("expected block content");
        };
        match &blocks[1] {
            ContentBlock::Image { source } => {
                assert_eq!(source.media_type, "image/png");
                assert_eq!(source.data, "aWNvbg==");
            }
            other => panic!("expected image block, got {:?}", other),
        }
        assert!(
            matches!(&blocks[2], ContentBlock::Text { text } if text == "[image_url] https://example.com/a.png")
        );
    }

    #[test]
    fn tool_message_without_call_id_gets_synthetic_id() {
        let req: OpenAIRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "tool", "content": "result"}]
        }))
        .unwrap();
        let claude = transform_openai_to_claude(&req);
        let MessageContent::Array(blocks) = &claude.messages[0].content else {
            panic!("expected block content");
        };
        match &blocks[0] {
            ContentBlock::ToolResult { tool_use_id, .. } => {
                assert!(tool_use_id.starts_with("toolu_"));
            }
            other => panic!("expected tool_result, got {:?}", other),
        }
    }
}
