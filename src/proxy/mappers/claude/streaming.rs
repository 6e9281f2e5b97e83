use super::models::*;
use crate::proxy::common::utils::generate_random_id;
use crate::proxy::mappers::error_classifier::classify_stream_error;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    None,
    Text,
    Thinking,
    Function,
}

// Holds a thought signature until its block closes; the signature_delta
// must be the last delta inside a thinking block.
struct SignatureManager {
    pending: Option<String>,
}

impl SignatureManager {
    fn new() -> Self {
        Self { pending: None }
    }

    fn store(&mut self, signature: Option<String>) {
        if signature.is_some() {
            self.pending = signature;
        }
    }

    fn consume(&mut self) -> Option<String> {
        self.pending.take()
    }
}

// Per-stream event state machine. Guarantees every emitted sequence is a
// valid Anthropic event prefix: message_start once, one open content block
// at a time, message_delta + message_stop at the end.
pub struct StreamingState {
    block_type: BlockType,
    pub block_index: usize,
    pub message_start_sent: bool,
    pub message_stop_sent: bool,
    used_tool: bool,
    signatures: SignatureManager,
    parse_error_count: usize,
    last_usage: Option<UsageMetadata>,
    pub has_content: bool,
}

impl StreamingState {
    pub fn new() -> Self {
        Self {
            block_type: BlockType::None,
            block_index: 0,
            message_start_sent: false,
            message_stop_sent: false,
            used_tool: false,
            signatures: SignatureManager::new(),
            parse_error_count: 0,
            last_usage: None,
            has_content: false,
        }
    }

    pub fn current_block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn emit(&self, event_type: &str, data: serde_json::Value) -> Bytes {
        Bytes::from(format!(
            "event: {}\ndata: {}\n\n",
            event_type,
            serde_json::to_string(&data).unwrap_or_default()
        ))
    }

    pub fn emit_message_start(&mut self, raw_json: &serde_json::Value) -> Bytes {
        if self.message_start_sent {
            return Bytes::new();
        }

        let usage = raw_json
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<UsageMetadata>(u.clone()).ok())
            .map(|u| to_claude_usage(&u));

        let mut message = json!({
            "id": raw_json.get("responseId").and_then(|v| v.as_str()).unwrap_or("msg_unknown"),
            "type": "message",
            "role": "assistant",
            "content": [],
            "model": raw_json.get("modelVersion").and_then(|v| v.as_str()).unwrap_or(""),
            "stop_reason": null,
            "stop_sequence": null,
        });
        if let Some(u) = usage {
            message["usage"] = json!(u);
        }

        self.message_start_sent = true;
        self.emit(
            "message_start",
            json!({ "type": "message_start", "message": message }),
        )
    }

    pub fn start_block(
        &mut self,
        block_type: BlockType,
        content_block: serde_json::Value,
    ) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        if self.block_type != BlockType::None {
            chunks.extend(self.end_block());
        }
        chunks.push(self.emit(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block
            }),
        ));
        self.block_type = block_type;
        chunks
    }

    pub fn end_block(&mut self) -> Vec<Bytes> {
        if self.block_type == BlockType::None {
            return vec![];
        }

        let mut chunks = Vec::new();
        if self.block_type == BlockType::Thinking {
            if let Some(signature) = self.signatures.consume() {
                chunks.push(self.emit_delta("signature_delta", json!({ "signature": signature })));
            }
        }
        chunks.push(self.emit(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": self.block_index }),
        ));
        self.block_index += 1;
        self.block_type = BlockType::None;
        chunks
    }

    pub fn emit_delta(&self, delta_type: &str, delta_content: serde_json::Value) -> Bytes {
        let mut delta = json!({ "type": delta_type });
        if let serde_json::Value::Object(map) = delta_content {
            for (k, v) in map {
                delta[k] = v;
            }
        }
        self.emit(
            "content_block_delta",
            json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": delta
            }),
        )
    }

    pub fn record_usage(&mut self, usage: Option<UsageMetadata>) {
        if usage.is_some() {
            self.last_usage = usage;
        }
    }

    pub fn emit_finish(&mut self, finish_reason: Option<&str>) -> Vec<Bytes> {
        let mut chunks = self.end_block();

        let stop_reason = if self.used_tool {
            "tool_use"
        } else if finish_reason == Some("MAX_TOKENS") {
            "max_tokens"
        } else {
            "end_turn"
        };
        let usage = self
            .last_usage
            .as_ref()
            .map(to_claude_usage)
            .unwrap_or_default();

        chunks.push(self.emit(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason, "stop_sequence": null },
                "usage": usage
            }),
        ));

        if !self.message_stop_sent {
            chunks.push(Bytes::from(
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ));
            self.message_stop_sent = true;
        }
        chunks
    }

    pub fn mark_tool_used(&mut self) {
        self.used_tool = true;
    }

    pub fn store_signature(&mut self, signature: Option<String>) {
        self.signatures.store(signature);
    }

    // A malformed frame closes whatever block is open and reports a
    // recoverable error; the stream keeps going.
    pub fn handle_parse_error(&mut self, raw_len: usize) -> Vec<Bytes> {
        self.parse_error_count += 1;
        tracing::warn!(
            "Skipping malformed upstream frame #{} ({} bytes)",
            self.parse_error_count,
            raw_len
        );

        let mut chunks = self.end_block();
        chunks.push(self.emit(
            "error",
            json!({
                "type": "error",
                "error": {
                    "type": "api_error",
                    "message": "Malformed upstream frame skipped"
                }
            }),
        ));
        chunks
    }
}

impl Default for StreamingState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PartProcessor<'a> {
    state: &'a mut StreamingState,
}

impl<'a> PartProcessor<'a> {
    pub fn new(state: &'a mut StreamingState) -> Self {
        Self { state }
    }

    pub fn process(&mut self, part: &GeminiPart) -> Vec<Bytes> {
        let mut chunks = Vec::new();

        if let Some(fc) = &part.function_call {
            chunks.extend(self.process_function_call(fc));
            self.state.has_content = true;
            return chunks;
        }

        if let Some(text) = &part.text {
            if part.thought.unwrap_or(false) {
                chunks.extend(self.process_thinking(text, part.thought_signature.clone()));
            } else {
                chunks.extend(self.process_text(text));
            }
        }

        if let Some(img) = &part.inline_data {
            if !img.data.is_empty() {
                let markdown = format!("![image](data:{};base64,{})", img.mime_type, img.data);
                chunks.extend(self.process_text(&markdown));
            }
        }

        chunks
    }

    fn process_thinking(&mut self, text: &str, signature: Option<String>) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        if self.state.current_block_type() != BlockType::Thinking {
            chunks.extend(self.state.start_block(
                BlockType::Thinking,
                json!({ "type": "thinking", "thinking": "" }),
            ));
        }
        if !text.is_empty() {
            chunks.push(
                self.state
                    .emit_delta("thinking_delta", json!({ "thinking": text })),
            );
        }
        self.state.store_signature(signature);
        chunks
    }

    fn process_text(&mut self, text: &str) -> Vec<Bytes> {
        if text.is_empty() {
            return vec![];
        }
        let mut chunks = Vec::new();
        self.state.has_content = true;
        if self.state.current_block_type() != BlockType::Text {
            chunks.extend(
                self.state
                    .start_block(BlockType::Text, json!({ "type": "text", "text": "" })),
            );
        }
        chunks.push(self.state.emit_delta("text_delta", json!({ "text": text })));
        chunks
    }

    fn process_function_call(&mut self, fc: &FunctionCall) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        self.state.mark_tool_used();

        let tool_id = fc
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", fc.name, generate_random_id()));
        let tool_use = json!({
            "type": "tool_use",
            "id": tool_id,
            "name": fc.name,
            "input": {}
        });

        chunks.extend(self.state.start_block(BlockType::Function, tool_use));
        if let Some(args) = &fc.args {
            let json_str = serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string());
            chunks.push(
                self.state
                    .emit_delta("input_json_delta", json!({ "partial_json": json_str })),
            );
        }
        chunks.extend(self.state.end_block());
        chunks
    }
}

pub fn emit_force_stop(state: &mut StreamingState) -> Vec<Bytes> {
    if state.message_stop_sent {
        return vec![];
    }
    state.emit_finish(None)
}

pub fn process_sse_line(line: &str, state: &mut StreamingState) -> Option<Vec<Bytes>> {
    if !line.starts_with("data: ") {
        return None;
    }
    let data_str = line[6..].trim();
    if data_str.is_empty() {
        return None;
    }
    if data_str == "[DONE]" {
        let chunks = emit_force_stop(state);
        return if chunks.is_empty() { None } else { Some(chunks) };
    }

    let json_value: serde_json::Value = match serde_json::from_str(data_str) {
        Ok(v) => v,
        Err(_) => return Some(state.handle_parse_error(data_str.len())),
    };

    let raw_json = json_value.get("response").unwrap_or(&json_value);
    let mut chunks = Vec::new();

    if !state.message_start_sent {
        chunks.push(state.emit_message_start(raw_json));
    }

    state.record_usage(
        raw_json
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<UsageMetadata>(u.clone()).ok()),
    );

    if let Some(parts) = raw_json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|cand| cand.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part_value in parts {
            if let Ok(part) = serde_json::from_value::<GeminiPart>(part_value.clone()) {
                let mut processor = PartProcessor::new(state);
                chunks.extend(processor.process(&part));
            }
        }
    }

    if let Some(finish_reason) = raw_json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|cand| cand.get("finishReason"))
        .and_then(|f| f.as_str())
    {
        chunks.extend(state.emit_finish(Some(finish_reason)));
    }

    if chunks.is_empty() {
        None
    } else {
        Some(chunks)
    }
}

pub type UpstreamByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

// Cold producer translating internal SSE into the Anthropic event wire.
// Owns the upstream reader; dropping the returned stream drops it.
pub fn create_claude_sse_stream(
    mut gemini_stream: UpstreamByteStream,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    Box::pin(async_stream::stream! {
        let mut state = StreamingState::new();
        let mut buffer = BytesMut::new();

        loop {
            let next_chunk = tokio::time::timeout(
                std::time::Duration::from_secs(30),
                gemini_stream.next(),
            )
            .await;

            match next_chunk {
                Ok(Some(Ok(chunk))) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_raw = buffer.split_to(pos + 1);
                        if let Ok(line_str) = std::str::from_utf8(&line_raw) {
                            let line = line_str.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if let Some(sse_chunks) = process_sse_line(line, &mut state) {
                                for sse_chunk in sse_chunks {
                                    yield Ok(sse_chunk);
                                }
                            }
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    let (error_type, user_msg) = classify_stream_error(&e);
                    tracing::error!("Claude stream error: {}", e);
                    yield Ok(state.emit(
                        "error",
                        json!({
                            "type": "error",
                            "error": { "type": error_type, "message": user_msg }
                        }),
                    ));
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    // Keep the connection alive while the upstream is quiet.
                    yield Ok(Bytes::from(": ping\n\n"));
                }
            }
        }

        for chunk in emit_force_stop(&mut state) {
            yield Ok(chunk);
        }
    })
}
