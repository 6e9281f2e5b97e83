use once_cell::sync::Lazy;

pub const DEFAULT_USER_AGENT: &str = "antigravity/1.11.9 windows/amd64";

// Resolved once at startup; PROXY_REQUEST_USER_AGENT overrides the default.
pub static USER_AGENT: Lazy<String> = Lazy::new(|| {
    std::env::var("PROXY_REQUEST_USER_AGENT")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
});

pub const INTERNAL_BASE_URL_PROD: &str = "https://cloudcode-pa.googleapis.com/v1internal";
pub const INTERNAL_BASE_URL_DAILY: &str = "https://daily-cloudcode-pa.googleapis.com/v1internal";

pub const ENV_INTERNAL_BASE_URLS: &str = "PROXY_INTERNAL_BASE_URLS";
pub const ENV_INTERNAL_BASE_URLS_ALT: &str = "ANTIGRAVITY_INTERNAL_BASE_URLS";

// Attached when the mapped model is a Claude family.
pub const ANTHROPIC_BETA_HEADER: &str =
    "claude-code-20250219,interleaved-thinking-2025-05-14,fine-grained-tool-streaming-2025-05-14";

// Anthropic-surface downgrade target when a Claude route reports quota exhaustion.
pub const QUOTA_FALLBACK_MODEL: &str = "gemini-2.5-flash";

pub const MODELS_OWNED_BY: &str = "antigravity";
pub const MODELS_CREATED_AT: i64 = 1_770_652_800;
