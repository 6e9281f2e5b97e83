use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account error: {0}")]
    Account(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AppResult<T> = Result<T, AppError>;

// Classification of an upstream failure, decided once at the classifier
// ingress so the dispatch loop pattern-matches instead of re-scanning
// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Network errors, 5xx, 408, empty stream. Retry with another account.
    Transient,
    // 429 / resource_exhausted / quota. Retry, cool the account down.
    RateLimited,
    // 401 / 403 / invalid_grant / permission_denied. Retry, longer cooldown.
    Forbidden,
    // Gemini project licensing / not-found. Inline retry, same account,
    // empty project.
    ProjectContext,
    // Anthropic surface only: inline retry downgrading the model.
    QuotaExhausted,
    // Distinguished so the unary path can fall back to streaming.
    EmptyResponseStream,
    // Malformed client input. No retry.
    BadRequest,
    // Everything else after retries.
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transient
                | ErrorKind::RateLimited
                | ErrorKind::Forbidden
                | ErrorKind::ProjectContext
                | ErrorKind::QuotaExhausted
                | ErrorKind::EmptyResponseStream
        )
    }
}

// The dispatch-layer error value. Carries only the classification and a
// human-readable message copied out of the upstream error; never the
// response or socket objects themselves.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn empty_stream() -> Self {
        Self::new(ErrorKind::EmptyResponseStream, "Empty response stream")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }
}
