// Per-request dispatch: account selection, the retry loop, inline
// project/quota fallbacks, and the unary<->stream fallbacks. Handlers call
// one operation here and only ever shape the HTTP answer.

use crate::constants;
use crate::error::{ErrorKind, ProxyError};
use crate::proxy::common::model_mapping::{is_claude_model, resolve_model_route};
use crate::proxy::mappers::claude::models::{ClaudeRequest, ClaudeResponse, GeminiResponse};
use crate::proxy::mappers::claude::{create_claude_sse_stream, transform_claude_request_in, transform_response};
use crate::proxy::mappers::error_classifier::{
    classify_upstream_error, is_project_context_error, is_quota_exhausted_error,
};
use crate::proxy::mappers::gemini::{collect_gemini_stream, unwrap_response, wrap_request};
use crate::proxy::mappers::openai::models::{OpenAIRequest, OpenAIResponse};
use crate::proxy::mappers::openai::{
    create_openai_sse_stream, create_synthetic_openai_sse, transform_claude_response_to_openai,
    transform_openai_to_claude,
};
use crate::proxy::session_manager::SessionManager;
use crate::proxy::token::{SelectOptions, TokenPool};
use crate::proxy::upstream::client::extract_upstream_error_message;
use crate::proxy::upstream::UpstreamClient;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

pub const MAX_RETRY_ATTEMPTS: usize = 3;
const FIRST_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;
type UpstreamByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

// Exponential backoff with jitter between attempts.
pub fn calculate_retry_delay(retry_index: usize) -> Duration {
    let base = 300u64.saturating_mul(1 << retry_index.min(4));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis((base + jitter).min(5_000))
}

fn snippet(text: &str) -> String {
    text.chars().take(500).collect()
}

#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub account_id: String,
    pub email: String,
    pub model_used: String,
}

pub enum ChatOutcome {
    Unary(OpenAIResponse, AccountInfo),
    Stream(SseStream, AccountInfo),
}

pub enum MessagesOutcome {
    Unary(ClaudeResponse, AccountInfo),
    Stream(SseStream, AccountInfo),
}

struct UpstreamCall<'a> {
    session_key: Option<String>,
    mapped_model: String,
    // Anthropic surface only: a quota-exhausted Claude route retries once
    // on gemini-2.5-flash with the same account.
    allow_quota_downgrade: bool,
    build: &'a (dyn Fn(&str, &str) -> Result<Value, ProxyError> + Sync),
}

enum Payload {
    Unary(reqwest::Response),
    Stream(UpstreamByteStream),
}

struct Attempt {
    payload: Payload,
    info: AccountInfo,
}

pub struct Dispatcher {
    pool: Arc<TokenPool>,
    upstream: Arc<UpstreamClient>,
    custom_mapping: Arc<RwLock<HashMap<String, String>>>,
    anthropic_mapping: Arc<RwLock<HashMap<String, String>>>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<TokenPool>,
        upstream: Arc<UpstreamClient>,
        custom_mapping: Arc<RwLock<HashMap<String, String>>>,
        anthropic_mapping: Arc<RwLock<HashMap<String, String>>>,
    ) -> Self {
        Self {
            pool,
            upstream,
            custom_mapping,
            anthropic_mapping,
        }
    }

    pub async fn resolve_route(&self, model: &str) -> String {
        let custom = self.custom_mapping.read().await;
        let anthropic = self.anthropic_mapping.read().await;
        resolve_model_route(model, &custom, &anthropic)
    }

    fn model_headers(model: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if model.to_ascii_lowercase().contains("claude") {
            headers.insert(
                "anthropic-beta".to_string(),
                constants::ANTHROPIC_BETA_HEADER.to_string(),
            );
        }
        headers
    }

    // The retry loop: up to three attempts, each on a not-yet-attempted
    // account, with the inline same-account fallbacks folded in.
    async fn run_attempts(
        &self,
        call: &UpstreamCall<'_>,
        stream: bool,
    ) -> Result<Attempt, ProxyError> {
        let mut attempted: HashSet<String> = HashSet::new();
        let mut last_err =
            ProxyError::new(ErrorKind::Fatal, "No available accounts for this request");

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(calculate_retry_delay(attempt - 1)).await;
            }

            let token = match self
                .pool
                .select_next(SelectOptions {
                    session_key: call.session_key.as_deref(),
                    exclude_account_ids: Some(&attempted),
                })
                .await
            {
                Some(t) => t,
                None => {
                    return Err(ProxyError::new(
                        ErrorKind::Fatal,
                        "No available accounts: token pool is empty",
                    ))
                }
            };
            attempted.insert(token.account_id.clone());

            match self.attempt_with_account(call, &token, stream).await {
                Ok(attempt_result) => return Ok(attempt_result),
                Err(err) => {
                    match err.kind {
                        ErrorKind::Forbidden => self.pool.mark_forbidden(&token.account_id),
                        ErrorKind::RateLimited => self.pool.mark_rate_limited(&token.account_id),
                        ErrorKind::Transient | ErrorKind::EmptyResponseStream => {}
                        _ => return Err(err),
                    }
                    tracing::warn!(
                        "Attempt {}/{} failed on account {}: {}",
                        attempt + 1,
                        MAX_RETRY_ATTEMPTS,
                        token.email,
                        err
                    );
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    // One account, with at most one project-context retry and one quota
    // downgrade before the outer attempt advances.
    async fn attempt_with_account(
        &self,
        call: &UpstreamCall<'_>,
        token: &crate::proxy::token::PooledToken,
        stream: bool,
    ) -> Result<Attempt, ProxyError> {
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let query = if stream { Some("alt=sse") } else { None };

        let mut project_id = token.project_id.clone();
        let mut project_cleared = project_id.is_empty();
        let mut model = call.mapped_model.clone();
        let mut downgraded = false;

        loop {
            let body = (call.build)(&project_id, &model)?;
            let extra_headers = Self::model_headers(&model);

            let response = match self
                .upstream
                .call_internal(method, &token.access_token, &body, query, &extra_headers)
                .await
            {
                Ok(r) => r,
                Err(transport) => {
                    return Err(ProxyError::new(
                        classify_upstream_error(None, &transport),
                        transport,
                    ));
                }
            };

            let status = response.status();
            if status.is_success() {
                let payload = if stream {
                    Payload::Stream(self.peek_stream(response).await?)
                } else {
                    Payload::Unary(response)
                };
                return Ok(Attempt {
                    payload,
                    info: AccountInfo {
                        account_id: token.account_id.clone(),
                        email: token.email.clone(),
                        model_used: model,
                    },
                });
            }

            let status_code = status.as_u16();
            let error_text = response.text().await.unwrap_or_default();
            let message = extract_upstream_error_message(status_code, &error_text);
            tracing::debug!(
                "Upstream error on account {}: {}",
                token.email,
                snippet(&message)
            );

            if !project_cleared && is_project_context_error(&message) {
                tracing::warn!(
                    "Project-context error for account {}, retrying with empty project: {}",
                    token.email,
                    snippet(&message)
                );
                project_id.clear();
                project_cleared = true;
                continue;
            }

            if call.allow_quota_downgrade
                && !downgraded
                && is_claude_model(&model)
                && is_quota_exhausted_error(&message)
            {
                tracing::warn!(
                    "Quota exhausted on {} for account {}, downgrading to {}",
                    model,
                    token.email,
                    constants::QUOTA_FALLBACK_MODEL
                );
                model = constants::QUOTA_FALLBACK_MODEL.to_string();
                downgraded = true;
                continue;
            }

            return Err(ProxyError::with_status(
                classify_upstream_error(Some(status_code), &message),
                status_code,
                message,
            ));
        }
    }

    // A streaming success is only a success once the body produces bytes;
    // a stream that ends before any data retries on another account.
    async fn peek_stream(
        &self,
        response: reqwest::Response,
    ) -> Result<UpstreamByteStream, ProxyError> {
        let mut byte_stream: UpstreamByteStream = Box::pin(response.bytes_stream());
        loop {
            match tokio::time::timeout(FIRST_CHUNK_TIMEOUT, byte_stream.next()).await {
                Ok(Some(Ok(first))) => {
                    if first.is_empty() {
                        continue;
                    }
                    return Ok(Box::pin(
                        futures::stream::once(async move { Ok::<Bytes, reqwest::Error>(first) })
                            .chain(byte_stream),
                    ));
                }
                Ok(Some(Err(e))) => {
                    return Err(ProxyError::new(
                        ErrorKind::Transient,
                        format!("Stream error before first chunk: {}", e),
                    ));
                }
                Ok(None) => return Err(ProxyError::empty_stream()),
                Err(_) => {
                    return Err(ProxyError::new(
                        ErrorKind::Transient,
                        "Timeout waiting for first stream chunk",
                    ));
                }
            }
        }
    }

    async fn read_unary(&self, response: reqwest::Response) -> Result<GeminiResponse, ProxyError> {
        let bytes = response.bytes().await.map_err(|e| {
            ProxyError::new(
                ErrorKind::Transient,
                format!("Failed to read upstream body: {}", e),
            )
        })?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            ProxyError::new(
                ErrorKind::Transient,
                format!("Failed to parse upstream body: {}", e),
            )
        })?;
        let unwrapped = unwrap_response(&value);
        serde_json::from_value(unwrapped).map_err(|e| {
            ProxyError::new(
                ErrorKind::Transient,
                format!("Unexpected upstream response shape: {}", e),
            )
        })
    }

    // Unary call; when the answer has no usable candidate, one streaming
    // call is made and collapsed back into a unary response.
    async fn unary_with_fallback(
        &self,
        call: &UpstreamCall<'_>,
    ) -> Result<(GeminiResponse, AccountInfo), ProxyError> {
        let attempt = self.run_attempts(call, false).await?;
        let Payload::Unary(response) = attempt.payload else {
            return Err(ProxyError::new(
                ErrorKind::Fatal,
                "Unary dispatch produced a stream payload",
            ));
        };
        let gemini = self.read_unary(response).await?;
        if gemini.has_parts() {
            return Ok((gemini, attempt.info));
        }

        tracing::warn!(
            "Empty unary response from account {}, falling back to streaming",
            attempt.info.email
        );
        let stream_attempt = self.run_attempts(call, true).await?;
        let Payload::Stream(stream) = stream_attempt.payload else {
            return Err(ProxyError::new(
                ErrorKind::Fatal,
                "Stream dispatch produced a unary payload",
            ));
        };
        let collected = collect_gemini_stream(stream).await?;
        Ok((collected, stream_attempt.info))
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    pub async fn anthropic_messages(
        &self,
        request: ClaudeRequest,
    ) -> Result<MessagesOutcome, ProxyError> {
        let client_model = request.model.clone();
        let mapped_model = self.resolve_route(&client_model).await;
        let session_key = SessionManager::claude_session_key(&request);
        let wants_stream = request.stream;

        let build = |project: &str, model: &str| -> Result<Value, ProxyError> {
            let mut upstream_request = request.clone();
            upstream_request.model = model.to_string();
            transform_claude_request_in(&upstream_request, project)
                .map_err(ProxyError::bad_request)
        };
        let call = UpstreamCall {
            session_key,
            mapped_model,
            allow_quota_downgrade: true,
            build: &build,
        };

        if wants_stream {
            let attempt = self.run_attempts(&call, true).await?;
            let Payload::Stream(stream) = attempt.payload else {
                return Err(ProxyError::new(ErrorKind::Fatal, "expected stream payload"));
            };
            return Ok(MessagesOutcome::Stream(
                create_claude_sse_stream(stream),
                attempt.info,
            ));
        }

        let (gemini, info) = self.unary_with_fallback(&call).await?;
        let mut claude = transform_response(&gemini)
            .map_err(|e| ProxyError::new(ErrorKind::Fatal, e))?;
        // Clients see the model they asked for, whatever route (or quota
        // downgrade) served it.
        claude.model = client_model;
        Ok(MessagesOutcome::Unary(claude, info))
    }

    pub async fn chat_completions(
        &self,
        request: OpenAIRequest,
    ) -> Result<ChatOutcome, ProxyError> {
        let client_model = request.model.clone();
        let session_key = SessionManager::openai_session_key(&request);
        let claude_request = transform_openai_to_claude(&request);
        let mapped_model = self.resolve_route(&client_model).await;
        let wants_stream = request.stream;

        let build = |project: &str, model: &str| -> Result<Value, ProxyError> {
            let mut upstream_request = claude_request.clone();
            upstream_request.model = model.to_string();
            transform_claude_request_in(&upstream_request, project)
                .map_err(ProxyError::bad_request)
        };
        let call = UpstreamCall {
            session_key,
            mapped_model,
            allow_quota_downgrade: false,
            build: &build,
        };

        if wants_stream {
            match self.run_attempts(&call, true).await {
                Ok(attempt) => {
                    let Payload::Stream(stream) = attempt.payload else {
                        return Err(ProxyError::new(ErrorKind::Fatal, "expected stream payload"));
                    };
                    return Ok(ChatOutcome::Stream(
                        create_openai_sse_stream(stream, client_model.clone()),
                        attempt.info,
                    ));
                }
                Err(stream_err) => {
                    // The stream never opened; answer with a unary call
                    // replayed as synthetic SSE.
                    tracing::warn!(
                        "Streaming dispatch failed before the body began ({}), falling back to unary",
                        stream_err
                    );
                    let (gemini, info) = self.unary_with_fallback(&call).await?;
                    let mut claude = transform_response(&gemini)
                        .map_err(|e| ProxyError::new(ErrorKind::Fatal, e))?;
                    claude.model = client_model.clone();
                    let openai = transform_claude_response_to_openai(&claude, &client_model);
                    return Ok(ChatOutcome::Stream(
                        create_synthetic_openai_sse(&openai),
                        info,
                    ));
                }
            }
        }

        let (gemini, info) = self.unary_with_fallback(&call).await?;
        let mut claude =
            transform_response(&gemini).map_err(|e| ProxyError::new(ErrorKind::Fatal, e))?;
        claude.model = client_model.clone();
        Ok(ChatOutcome::Unary(
            transform_claude_response_to_openai(&claude, &client_model),
            info,
        ))
    }

    pub async fn gemini_generate(
        &self,
        model: &str,
        body: Value,
    ) -> Result<(GeminiResponse, AccountInfo), ProxyError> {
        let mapped_model = self.resolve_route(model).await;

        let build = |project: &str, route: &str| -> Result<Value, ProxyError> {
            Ok(wrap_request(&body, project, route))
        };
        let call = UpstreamCall {
            session_key: None,
            mapped_model,
            allow_quota_downgrade: false,
            build: &build,
        };

        self.unary_with_fallback(&call).await
    }

    pub async fn gemini_stream(
        &self,
        model: &str,
        body: Value,
    ) -> Result<(SseStream, AccountInfo), ProxyError> {
        let mapped_model = self.resolve_route(model).await;

        let build = |project: &str, route: &str| -> Result<Value, ProxyError> {
            Ok(wrap_request(&body, project, route))
        };
        let call = UpstreamCall {
            session_key: None,
            mapped_model,
            allow_quota_downgrade: false,
            build: &build,
        };

        let attempt = self.run_attempts(&call, true).await?;
        let Payload::Stream(stream) = attempt.payload else {
            return Err(ProxyError::new(ErrorKind::Fatal, "expected stream payload"));
        };
        // Pass-through: bytes forwarded verbatim after UTF-8 re-decode.
        let passthrough: SseStream = Box::pin(stream.map(|item| match item {
            Ok(bytes) => Ok(Bytes::from(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) => Err(e.to_string()),
        }));
        Ok((passthrough, attempt.info))
    }
}
