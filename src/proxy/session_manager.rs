use crate::proxy::mappers::claude::models::ClaudeRequest;
use crate::proxy::mappers::openai::models::OpenAIRequest;
use serde_json::Value;

const SESSION_KEYS: &[&str] = &["session_id", "sessionId", "user_id", "userId"];

// Session keys pin conversations to one account. They come only from
// client-supplied metadata; without one the request rotates freely.
pub struct SessionManager;

impl SessionManager {
    pub fn claude_session_key(request: &ClaudeRequest) -> Option<String> {
        let id = first_string_value(request.metadata.as_ref()?)?;
        Some(format!("anthropic:{}", id))
    }

    pub fn openai_session_key(request: &OpenAIRequest) -> Option<String> {
        let id = first_string_value(request.extra.as_ref()?)?;
        Some(format!("openai:{}", id))
    }
}

fn first_string_value(metadata: &Value) -> Option<String> {
    for key in SESSION_KEYS {
        if let Some(value) = metadata.get(key).and_then(|v| v.as_str()) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
