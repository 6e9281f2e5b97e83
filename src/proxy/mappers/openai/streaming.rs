use super::models::{OpenAIResponse, OpenAIUsage};
use super::response::map_gemini_finish_reason;
use crate::proxy::mappers::error_classifier::classify_stream_error;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use uuid::Uuid;

pub type OpenAISseStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

const SYNTHETIC_DELTA_CHARS: usize = 80;

struct ChunkWriter {
    stream_id: String,
    created: i64,
    model: String,
}

impl ChunkWriter {
    fn new(model: String) -> Self {
        Self {
            stream_id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: Utc::now().timestamp(),
            model,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<&OpenAIUsage>) -> Bytes {
        let mut payload = json!({
            "id": &self.stream_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": &self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason
            }]
        });
        if let Some(u) = usage {
            payload["usage"] = serde_json::to_value(u).unwrap_or(Value::Null);
        }
        Bytes::from(format!(
            "data: {}\n\n",
            serde_json::to_string(&payload).unwrap_or_default()
        ))
    }

    fn error_chunk(&self, error_type: &str, message: &str) -> Bytes {
        let payload = json!({
            "id": &self.stream_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": &self.model,
            "choices": [],
            "error": { "type": error_type, "message": message, "code": "stream_error" }
        });
        Bytes::from(format!(
            "data: {}\n\n",
            serde_json::to_string(&payload).unwrap_or_default()
        ))
    }
}

fn usage_from_frame(frame: &Value) -> Option<OpenAIUsage> {
    let u = frame.get("usageMetadata")?;
    let prompt = u.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion = u
        .get("candidatesTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;
    let total = u
        .get("totalTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or((prompt + completion) as u64) as u32;
    Some(OpenAIUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
    })
}

// Internal SSE → OpenAI chat.completion.chunk SSE. One delta per upstream
// part, in upstream order; a finishReason closes the stream with an empty
// delta and a single [DONE].
pub fn create_openai_sse_stream(
    mut gemini_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    model: String,
) -> OpenAISseStream {
    let writer = ChunkWriter::new(model);
    let mut buffer = BytesMut::new();

    Box::pin(async_stream::stream! {
        let mut emitted_content = false;
        let mut finished = false;
        let mut final_usage: Option<OpenAIUsage> = None;
        let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(15));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                item = gemini_stream.next() => {
                    match item {
                        Some(Ok(bytes)) => {
                            buffer.extend_from_slice(&bytes);
                            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                                let line_raw = buffer.split_to(pos + 1);
                                let Ok(line_str) = std::str::from_utf8(&line_raw) else { continue };
                                let line = line_str.trim();
                                if !line.starts_with("data: ") { continue; }
                                let json_part = line[6..].trim();
                                if json_part.is_empty() || json_part == "[DONE]" { continue; }
                                let Ok(frame) = serde_json::from_str::<Value>(json_part) else {
                                    tracing::debug!("Skipping malformed upstream frame ({} bytes)", json_part.len());
                                    continue;
                                };
                                let frame = frame.get("response").unwrap_or(&frame).clone();

                                if let Some(usage) = usage_from_frame(&frame) {
                                    final_usage = Some(usage);
                                }

                                let candidate = frame.get("candidates").and_then(|c| c.get(0));
                                let parts = candidate
                                    .and_then(|c| c.get("content"))
                                    .and_then(|c| c.get("parts"))
                                    .and_then(|p| p.as_array());

                                if let Some(parts) = parts {
                                    for part in parts {
                                        if let Some(delta) = part_to_delta(part) {
                                            if delta.get("content").is_some()
                                                || delta.get("tool_calls").is_some()
                                                || delta.get("reasoning_content").is_some()
                                            {
                                                emitted_content = true;
                                            }
                                            yield Ok(writer.chunk(delta, None, None));
                                        }
                                    }
                                }

                                if let Some(reason) = candidate
                                    .and_then(|c| c.get("finishReason"))
                                    .and_then(|f| f.as_str())
                                {
                                    let mapped = map_gemini_finish_reason(reason);
                                    yield Ok(writer.chunk(json!({}), Some(mapped.as_str()), final_usage.as_ref()));
                                    yield Ok(Bytes::from("data: [DONE]\n\n"));
                                    finished = true;
                                }
                            }
                            if finished { break; }
                        }
                        Some(Err(e)) => {
                            let (error_type, message) = classify_stream_error(&e);
                            tracing::error!("OpenAI stream error: {}", e);
                            yield Ok(writer.error_chunk(error_type, message));
                            yield Ok(Bytes::from("data: [DONE]\n\n"));
                            finished = true;
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    yield Ok::<Bytes, String>(Bytes::from(": ping\n\n"));
                }
            }
        }

        if !finished {
            // The upstream closed without a finish frame; keep the client
            // protocol valid.
            if !emitted_content {
                yield Ok(writer.chunk(json!({"content": ""}), None, None));
            }
            yield Ok(Bytes::from("data: [DONE]\n\n"));
        }
    })
}

fn part_to_delta(part: &Value) -> Option<Value> {
    let is_thought = part.get("thought").and_then(|v| v.as_bool()).unwrap_or(false);

    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
        if is_thought {
            return Some(json!({ "reasoning_content": text }));
        }
        return Some(json!({ "content": text }));
    }

    if let Some(fc) = part.get("functionCall") {
        let name = fc.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
        let args = fc.get("args").cloned().unwrap_or_else(|| json!({}));
        let arguments = serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
        let id = fc
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{}-{}", name, Uuid::new_v4()));
        return Some(json!({
            "tool_calls": [{
                "index": 0,
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": arguments }
            }]
        }));
    }

    if let Some(img) = part.get("inlineData") {
        let mime = img
            .get("mimeType")
            .and_then(|v| v.as_str())
            .unwrap_or("image/png");
        let data = img.get("data").and_then(|v| v.as_str()).unwrap_or("");
        if !data.is_empty() {
            return Some(json!({
                "content": format!("\n\n![Generated Image](data:{};base64,{})\n\n", mime, data)
            }));
        }
    }

    None
}

// Unary response replayed as SSE for clients that asked for a stream after
// the streaming upstream path failed. Content goes out in bounded slices.
pub fn create_synthetic_openai_sse(response: &OpenAIResponse) -> OpenAISseStream {
    let writer = ChunkWriter::new(response.model.clone());
    let choice = response.choices.first();

    let content = choice
        .and_then(|c| c.message.content.as_ref())
        .map(|c| c.joined_text())
        .unwrap_or_default();
    let reasoning = choice.and_then(|c| c.message.reasoning_content.clone());
    let tool_calls = choice.and_then(|c| c.message.tool_calls.clone());
    let finish_reason = choice
        .and_then(|c| c.finish_reason.clone())
        .unwrap_or_else(|| "stop".to_string());
    let usage = response.usage.clone();

    Box::pin(async_stream::stream! {
        if let Some(reasoning) = reasoning {
            if !reasoning.is_empty() {
                yield Ok(writer.chunk(json!({"reasoning_content": reasoning}), None, None));
            }
        }

        let chars: Vec<char> = content.chars().collect();
        if chars.is_empty() {
            yield Ok(writer.chunk(json!({"content": ""}), None, None));
        } else {
            for slice in chars.chunks(SYNTHETIC_DELTA_CHARS) {
                let piece: String = slice.iter().collect();
                yield Ok(writer.chunk(json!({"content": piece}), None, None));
            }
        }

        if let Some(calls) = tool_calls {
            for (index, call) in calls.iter().enumerate() {
                yield Ok(writer.chunk(json!({
                    "tool_calls": [{
                        "index": index,
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.function.name, "arguments": call.function.arguments }
                    }]
                }), None, None));
            }
        }

        yield Ok(writer.chunk(json!({}), Some(finish_reason.as_str()), usage.as_ref()));
        yield Ok(Bytes::from("data: [DONE]\n\n"));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mappers::openai::models::{Choice, OpenAIContent, OpenAIMessage};

    async fn collect_payloads(mut stream: OpenAISseStream) -> (Vec<Value>, usize) {
        let mut payloads = Vec::new();
        let mut done_count = 0;
        while let Some(item) = stream.next().await {
            let text = String::from_utf8(item.unwrap().to_vec()).unwrap();
            for line in text.lines() {
                let Some(raw) = line.strip_prefix("data: ") else { continue };
                if raw.trim() == "[DONE]" {
                    done_count += 1;
                    continue;
                }
                if let Ok(v) = serde_json::from_str::<Value>(raw) {
                    payloads.push(v);
                }
            }
        }
        (payloads, done_count)
    }

    fn frame(body: &str) -> Result<Bytes, reqwest::Error> {
        Ok(Bytes::from(format!("data: {}\n\n", body)))
    }

    #[tokio::test]
    async fn mixed_parts_emit_ordered_deltas() {
        let body = serde_json::to_string(&json!({
            "candidates": [{
                "content": {"parts": [
                    {"thought": true, "text": "reasoning"},
                    {"functionCall": {"id": "fc1", "name": "search", "args": {"q": "x"}}},
                    {"text": "answer"}
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        let frames = vec![frame(&body)];
        let stream = create_openai_sse_stream(
            Box::pin(futures::stream::iter(frames)),
            "gpt-4o".to_string(),
        );
        let (payloads, done) = collect_payloads(stream).await;

        assert_eq!(done, 1);
        assert_eq!(payloads.len(), 4);

        let delta = |i: usize| &payloads[i]["choices"][0]["delta"];
        assert_eq!(delta(0)["reasoning_content"], "reasoning");
        assert_eq!(delta(1)["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(
            delta(1)["tool_calls"][0]["function"]["arguments"],
            r#"{"q":"x"}"#
        );
        assert_eq!(delta(1)["tool_calls"][0]["id"], "fc1");
        assert_eq!(delta(2)["content"], "answer");
        assert_eq!(payloads[3]["choices"][0]["finish_reason"], "stop");
        assert_eq!(payloads[3]["choices"][0]["delta"], json!({}));

        // All chunks share one id/model/created triple.
        let id = payloads[0]["id"].as_str().unwrap();
        let created = payloads[0]["created"].as_i64().unwrap();
        for p in &payloads {
            assert_eq!(p["id"], id);
            assert_eq!(p["model"], "gpt-4o");
            assert_eq!(p["created"], created);
            assert_eq!(p["object"], "chat.completion.chunk");
        }
    }

    #[tokio::test]
    async fn function_call_without_id_gets_name_uuid_id() {
        let frames = vec![frame(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"lookup","args":{}}}]},"finishReason":"STOP"}]}"#,
        )];
        let stream = create_openai_sse_stream(
            Box::pin(futures::stream::iter(frames)),
            "gpt-4o".to_string(),
        );
        let (payloads, _) = collect_payloads(stream).await;
        let id = payloads[0]["choices"][0]["delta"]["tool_calls"][0]["id"]
            .as_str()
            .unwrap();
        assert!(id.starts_with("lookup-"));
    }

    #[tokio::test]
    async fn inline_data_becomes_image_markdown() {
        let frames = vec![frame(
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"aWNvbg=="}}]},"finishReason":"STOP"}]}"#,
        )];
        let stream = create_openai_sse_stream(
            Box::pin(futures::stream::iter(frames)),
            "gemini-3-pro-image".to_string(),
        );
        let (payloads, _) = collect_payloads(stream).await;
        let content = payloads[0]["choices"][0]["delta"]["content"].as_str().unwrap();
        assert_eq!(
            content,
            "\n\n![Generated Image](data:image/png;base64,aWNvbg==)\n\n"
        );
    }

    #[tokio::test]
    async fn empty_stream_emits_empty_chunk_and_done() {
        let frames: Vec<Result<Bytes, reqwest::Error>> = vec![];
        let stream = create_openai_sse_stream(
            Box::pin(futures::stream::iter(frames)),
            "gpt-4o".to_string(),
        );
        let (payloads, done) = collect_payloads(stream).await;
        assert_eq!(done, 1);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["choices"][0]["delta"]["content"], "");
    }

    #[tokio::test]
    async fn usage_rides_on_the_finish_chunk() {
        let frames = vec![frame(
            r#"{"candidates":[{"content":{"parts":[{"text":"x"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":3,"totalTokenCount":10}}"#,
        )];
        let stream = create_openai_sse_stream(
            Box::pin(futures::stream::iter(frames)),
            "gpt-4o".to_string(),
        );
        let (payloads, _) = collect_payloads(stream).await;
        let finish = payloads.last().unwrap();
        assert_eq!(finish["usage"]["prompt_tokens"], 7);
        assert_eq!(finish["usage"]["total_tokens"], 10);
    }

    #[tokio::test]
    async fn synthetic_stream_slices_long_content() {
        let long_content = "x".repeat(200);
        let response = OpenAIResponse {
            id: "chatcmpl-synth".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: OpenAIMessage {
                    role: "assistant".to_string(),
                    content: Some(OpenAIContent::String(long_content)),
                    reasoning_content: None,
                    tool_calls: None,
                    tool_call_id: None,
                    name: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        };

        let (payloads, done) = collect_payloads(create_synthetic_openai_sse(&response)).await;
        assert_eq!(done, 1);

        let content_chunks: Vec<&Value> = payloads
            .iter()
            .filter(|p| p["choices"][0]["delta"]["content"].is_string())
            .collect();
        assert_eq!(content_chunks.len(), 3);
        for chunk in &content_chunks {
            let text = chunk["choices"][0]["delta"]["content"].as_str().unwrap();
            assert!(text.chars().count() <= 80);
        }
        let reassembled: String = content_chunks
            .iter()
            .map(|c| c["choices"][0]["delta"]["content"].as_str().unwrap())
            .collect();
        assert_eq!(reassembled.len(), 200);
        assert_eq!(
            payloads.last().unwrap()["choices"][0]["finish_reason"],
            "stop"
        );
    }
}
