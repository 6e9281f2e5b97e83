// Non-streaming response conversion (Gemini internal → Claude).

use super::models::*;
use crate::proxy::common::utils::generate_random_id;

// Accumulates parts into ordered Claude content blocks. Consecutive text
// and thinking runs merge; a function call flushes whatever is open.
struct PartAccumulator {
    content_blocks: Vec<ContentBlock>,
    text_builder: String,
    thinking_builder: String,
    thinking_signature: Option<String>,
    has_tool_call: bool,
}

impl PartAccumulator {
    fn new() -> Self {
        Self {
            content_blocks: Vec::new(),
            text_builder: String::new(),
            thinking_builder: String::new(),
            thinking_signature: None,
            has_tool_call: false,
        }
    }

    fn process_part(&mut self, part: &GeminiPart) {
        if let Some(fc) = &part.function_call {
            self.flush_thinking();
            self.flush_text();
            self.has_tool_call = true;

            let tool_id = fc
                .id
                .clone()
                .unwrap_or_else(|| format!("{}-{}", fc.name, generate_random_id()));
            self.content_blocks.push(ContentBlock::ToolUse {
                id: tool_id,
                name: fc.name.clone(),
                input: fc.args.clone().unwrap_or_else(|| serde_json::json!({})),
            });
            return;
        }

        if let Some(text) = &part.text {
            if part.thought.unwrap_or(false) {
                self.flush_text();
                self.thinking_builder.push_str(text);
                if part.thought_signature.is_some() {
                    self.thinking_signature = part.thought_signature.clone();
                }
            } else if !text.is_empty() {
                self.flush_thinking();
                self.text_builder.push_str(text);
            }
        }

        if let Some(img) = &part.inline_data {
            if !img.data.is_empty() {
                self.flush_thinking();
                self.text_builder.push_str(&format!(
                    "![image](data:{};base64,{})",
                    img.mime_type, img.data
                ));
            }
        }
    }

    fn flush_text(&mut self) {
        if self.text_builder.is_empty() {
            return;
        }
        self.content_blocks.push(ContentBlock::Text {
            text: std::mem::take(&mut self.text_builder),
        });
    }

    fn flush_thinking(&mut self) {
        if self.thinking_builder.is_empty() && self.thinking_signature.is_none() {
            return;
        }
        self.content_blocks.push(ContentBlock::Thinking {
            thinking: std::mem::take(&mut self.thinking_builder),
            signature: self.thinking_signature.take(),
        });
    }
}

pub fn transform_response(gemini_response: &GeminiResponse) -> Result<ClaudeResponse, String> {
    let mut acc = PartAccumulator::new();
    for part in gemini_response.first_parts() {
        acc.process_part(part);
    }
    acc.flush_thinking();
    acc.flush_text();

    let finish_reason = gemini_response
        .candidates
        .as_deref()
        .and_then(|c| c.first())
        .and_then(|candidate| candidate.finish_reason.as_deref());

    let stop_reason = if acc.has_tool_call {
        "tool_use"
    } else if finish_reason == Some("MAX_TOKENS") {
        "max_tokens"
    } else {
        "end_turn"
    };

    let usage = gemini_response
        .usage_metadata
        .as_ref()
        .map(to_claude_usage)
        .unwrap_or_default();

    Ok(ClaudeResponse {
        id: gemini_response
            .response_id
            .clone()
            .unwrap_or_else(|| format!("msg_{}", generate_random_id())),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: gemini_response.model_version.clone().unwrap_or_default(),
        content: acc.content_blocks,
        stop_reason: stop_reason.to_string(),
        stop_sequence: None,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gemini_response(parts: serde_json::Value, finish: &str) -> GeminiResponse {
        serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": parts },
                "finishReason": finish
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5 },
            "modelVersion": "gemini-3-pro",
            "responseId": "resp_123"
        }))
        .unwrap()
    }

    #[test]
    fn simple_text_response() {
        let resp = transform_response(&gemini_response(json!([{"text": "Hello, world!"}]), "STOP"))
            .unwrap();

        assert_eq!(resp.id, "resp_123");
        assert_eq!(resp.role, "assistant");
        assert_eq!(resp.stop_reason, "end_turn");
        assert_eq!(resp.usage.input_tokens, 10);
        match &resp.content[0] {
            ContentBlock::Text { text } => assert_eq!(text, "Hello, world!"),
            other => panic!("expected text block, got {:?}", other),
        }
    }

    #[test]
    fn thinking_then_text_produces_two_blocks() {
        let resp = transform_response(&gemini_response(
            json!([
                {"text": "Let me think...", "thought": true, "thoughtSignature": "sig123"},
                {"text": "The answer is 42"}
            ]),
            "STOP",
        ))
        .unwrap();

        assert_eq!(resp.content.len(), 2);
        match &resp.content[0] {
            ContentBlock::Thinking {
                thinking,
                signature,
            } => {
                assert_eq!(thinking, "Let me think...");
                assert_eq!(signature.as_deref(), Some("sig123"));
            }
            other => panic!("expected thinking block, got {:?}", other),
        }
    }

    #[test]
    fn function_call_sets_tool_use_stop_reason() {
        let resp = transform_response(&gemini_response(
            json!([
                {"text": "Calling tool."},
                {"functionCall": {"name": "search", "args": {"q": "x"}, "id": "fc1"}}
            ]),
            "STOP",
        ))
        .unwrap();

        assert_eq!(resp.stop_reason, "tool_use");
        match &resp.content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "fc1");
                assert_eq!(name, "search");
                assert_eq!(input["q"], "x");
            }
            other => panic!("expected tool_use block, got {:?}", other),
        }
    }

    #[test]
    fn function_call_without_id_gets_synthetic_id() {
        let resp = transform_response(&gemini_response(
            json!([{"functionCall": {"name": "search", "args": {}}}]),
            "STOP",
        ))
        .unwrap();

        match &resp.content[0] {
            ContentBlock::ToolUse { id, .. } => assert!(id.starts_with("search-")),
            other => panic!("expected tool_use block, got {:?}", other),
        }
    }

    #[test]
    fn max_tokens_maps_to_stop_reason() {
        let resp =
            transform_response(&gemini_response(json!([{"text": "trunc"}]), "MAX_TOKENS")).unwrap();
        assert_eq!(resp.stop_reason, "max_tokens");
    }

    #[test]
    fn empty_candidates_produce_empty_content() {
        let resp = transform_response(&GeminiResponse::default()).unwrap();
        assert!(resp.content.is_empty());
        assert!(resp.id.starts_with("msg_"));
    }
}
