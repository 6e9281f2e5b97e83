// Accumulates an internal SSE stream back into a unary GeminiResponse.
// Backs the empty-unary fallback: when generateContent comes back without
// candidates, one streaming call is made and collapsed through here.

use crate::error::ProxyError;
use crate::proxy::mappers::claude::models::{
    Candidate, GeminiContent, GeminiPart, GeminiResponse, UsageMetadata,
};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;

#[derive(Default)]
struct Accumulator {
    parts: Vec<GeminiPart>,
    finish_reason: Option<String>,
    usage: Option<UsageMetadata>,
    model_version: Option<String>,
    response_id: Option<String>,
}

impl Accumulator {
    fn absorb_frame(&mut self, frame: &Value) {
        let frame = frame.get("response").unwrap_or(frame);

        if let Some(usage) = frame.get("usageMetadata") {
            if let Ok(u) = serde_json::from_value::<UsageMetadata>(usage.clone()) {
                self.usage = Some(u);
            }
        }
        if self.model_version.is_none() {
            self.model_version = frame
                .get("modelVersion")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
        }
        if self.response_id.is_none() {
            self.response_id = frame
                .get("responseId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
        }

        let Some(candidate) = frame.get("candidates").and_then(|c| c.get(0)) else {
            return;
        };
        if let Some(reason) = candidate.get("finishReason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(reason.to_string());
        }
        let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        else {
            return;
        };

        for part_value in parts {
            let Ok(part) = serde_json::from_value::<GeminiPart>(part_value.clone()) else {
                continue;
            };
            self.absorb_part(part);
        }
    }

    fn absorb_part(&mut self, part: GeminiPart) {
        if let Some(text) = &part.text {
            let is_thought = part.thought.unwrap_or(false);
            // Merge consecutive text deltas of the same kind into one part.
            if let Some(last) = self.parts.last_mut() {
                let last_is_thought = last.thought.unwrap_or(false);
                if last.text.is_some()
                    && last.function_call.is_none()
                    && last.inline_data.is_none()
                    && last_is_thought == is_thought
                {
                    last.text.as_mut().unwrap().push_str(text);
                    if part.thought_signature.is_some() {
                        last.thought_signature = part.thought_signature;
                    }
                    return;
                }
            }
            self.parts.push(part);
            return;
        }

        if part.function_call.is_some() || part.inline_data.is_some() {
            self.parts.push(part);
        }
    }

    fn into_response(self) -> Result<GeminiResponse, ProxyError> {
        if self.parts.is_empty() {
            return Err(ProxyError::empty_stream());
        }

        Ok(GeminiResponse {
            candidates: Some(vec![Candidate {
                content: Some(GeminiContent {
                    role: "model".to_string(),
                    parts: self.parts,
                }),
                finish_reason: Some(self.finish_reason.unwrap_or_else(|| "STOP".to_string())),
                index: Some(0),
            }]),
            usage_metadata: self.usage,
            model_version: self.model_version,
            response_id: self.response_id,
        })
    }
}

pub async fn collect_gemini_stream<S>(mut stream: S) -> Result<GeminiResponse, ProxyError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Unpin,
{
    let mut acc = Accumulator::default();
    let mut buffer = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            ProxyError::new(
                crate::error::ErrorKind::Transient,
                format!("Stream error during collection: {}", e),
            )
        })?;
        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line_raw = buffer.split_to(pos + 1);
            let Ok(line_str) = std::str::from_utf8(&line_raw) else {
                continue;
            };
            let line = line_str.trim();
            if !line.starts_with("data: ") {
                continue;
            }
            let data = line[6..].trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            if let Ok(frame) = serde_json::from_str::<Value>(data) {
                acc.absorb_frame(&frame);
            }
        }
    }

    acc.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn frame(body: &str) -> Result<Bytes, reqwest::Error> {
        Ok(Bytes::from(format!("data: {}\n\n", body)))
    }

    #[tokio::test]
    async fn merges_text_deltas_into_one_part() {
        let frames = vec![
            frame(r#"{"candidates":[{"content":{"parts":[{"text":"hello "}]}}],"responseId":"r1"}"#),
            frame(
                r#"{"candidates":[{"content":{"parts":[{"text":"world"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":2}}"#,
            ),
        ];
        let response = collect_gemini_stream(Box::pin(futures::stream::iter(frames)))
            .await
            .unwrap();

        let parts = response.first_parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].text.as_deref(), Some("hello world"));
        assert_eq!(
            response.candidates.as_ref().unwrap()[0]
                .finish_reason
                .as_deref(),
            Some("STOP")
        );
        assert_eq!(
            response
                .usage_metadata
                .as_ref()
                .unwrap()
                .candidates_token_count,
            Some(2)
        );
    }

    #[tokio::test]
    async fn thought_and_plain_text_stay_separate() {
        let frames = vec![
            frame(r#"{"candidates":[{"content":{"parts":[{"text":"think","thought":true}]}}]}"#),
            frame(r#"{"candidates":[{"content":{"parts":[{"text":"answer"}]},"finishReason":"STOP"}]}"#),
        ];
        let response = collect_gemini_stream(Box::pin(futures::stream::iter(frames)))
            .await
            .unwrap();

        let parts = response.first_parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].thought, Some(true));
        assert_eq!(parts[1].text.as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn function_calls_are_kept_as_parts() {
        let frames = vec![frame(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"search","args":{"q":"x"}}}]},"finishReason":"STOP"}]}"#,
        )];
        let response = collect_gemini_stream(Box::pin(futures::stream::iter(frames)))
            .await
            .unwrap();
        let parts = response.first_parts();
        assert_eq!(parts[0].function_call.as_ref().unwrap().name, "search");
    }

    #[tokio::test]
    async fn empty_stream_is_a_distinguished_error() {
        let frames: Vec<Result<Bytes, reqwest::Error>> = vec![];
        let err = collect_gemini_stream(Box::pin(futures::stream::iter(frames)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyResponseStream);
    }

    #[tokio::test]
    async fn missing_finish_reason_defaults_to_stop() {
        let frames = vec![frame(
            r#"{"candidates":[{"content":{"parts":[{"text":"x"}]}}]}"#,
        )];
        let response = collect_gemini_stream(Box::pin(futures::stream::iter(frames)))
            .await
            .unwrap();
        assert_eq!(
            response.candidates.as_ref().unwrap()[0]
                .finish_reason
                .as_deref(),
            Some("STOP")
        );
    }
}
