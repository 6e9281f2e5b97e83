use super::models::*;
use crate::proxy::mappers::claude::models::{ClaudeResponse, ContentBlock};
use serde_json::Value;

pub fn map_claude_stop_reason(stop_reason: &str) -> String {
    match stop_reason {
        "end_turn" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

pub fn map_gemini_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        "SAFETY" | "RECITATION" => "content_filter".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

// Anthropic Messages response → OpenAI chat completion. Text blocks join
// into content, thinking into reasoning_content, tool_use into tool_calls.
pub fn transform_claude_response_to_openai(
    claude: &ClaudeResponse,
    client_model: &str,
) -> OpenAIResponse {
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &claude.content {
        match block {
            ContentBlock::Text { text } => content.push_str(text),
            ContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = match input {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_else(|_| "{}".to_string()),
                };
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ToolFunction {
                        name: name.clone(),
                        arguments,
                    },
                });
            }
            ContentBlock::Image { .. }
            | ContentBlock::RedactedThinking { .. }
            | ContentBlock::ToolResult { .. } => {
                tracing::debug!("Skipping response block without an OpenAI counterpart");
            }
        }
    }

    let message = OpenAIMessage {
        role: "assistant".to_string(),
        content: Some(OpenAIContent::String(content)),
        reasoning_content: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
        name: None,
    };

    OpenAIResponse {
        id: if claude.id.is_empty() {
            format!("chatcmpl-{}", uuid::Uuid::new_v4())
        } else {
            claude.id.clone()
        },
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: client_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: Some(map_claude_stop_reason(&claude.stop_reason)),
        }],
        usage: Some(OpenAIUsage {
            prompt_tokens: claude.usage.input_tokens,
            completion_tokens: claude.usage.output_tokens,
            total_tokens: claude.usage.input_tokens + claude.usage.output_tokens,
        }),
    }
}
