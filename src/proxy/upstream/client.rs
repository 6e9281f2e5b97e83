use crate::constants;
use crate::proxy::config::UpstreamProxyConfig;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use tokio::time::Duration;

// HTTP client for the internal generation endpoints. Endpoints are tried
// in order; only transient failures advance to the next one.
pub struct UpstreamClient {
    client: Client,
    base_urls: Vec<String>,
    user_agent: String,
}

impl UpstreamClient {
    pub fn new(request_timeout_secs: u64, upstream_proxy: &UpstreamProxyConfig) -> Self {
        Self::with_base_urls(request_timeout_secs, upstream_proxy, resolve_base_urls())
    }

    pub fn with_base_urls(
        request_timeout_secs: u64,
        upstream_proxy: &UpstreamProxyConfig,
        base_urls: Vec<String>,
    ) -> Self {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(request_timeout_secs.max(1)))
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90));

        if upstream_proxy.enabled && !upstream_proxy.url.is_empty() {
            match reqwest::Proxy::all(&upstream_proxy.url) {
                Ok(proxy) => {
                    tracing::info!("UpstreamClient using proxy: {}", upstream_proxy.url);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid upstream proxy URL '{}', bypassing: {}",
                        upstream_proxy.url,
                        e
                    );
                }
            }
        }

        Self {
            client: builder.build().expect("Failed to create upstream HTTP client"),
            base_urls,
            user_agent: constants::USER_AGENT.clone(),
        }
    }

    fn build_url(base_url: &str, method: &str, query_string: Option<&str>) -> String {
        match query_string {
            Some(qs) => format!("{}:{}?{}", base_url, method, qs),
            None => format!("{}:{}", base_url, method),
        }
    }

    // 401/403 mean a bad token, not a bad endpoint, so they never advance.
    fn should_try_next_endpoint(status: StatusCode) -> bool {
        status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }

    pub async fn call_internal(
        &self,
        method: &str,
        access_token: &str,
        body: &Value,
        query_string: Option<&str>,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Response, String> {
        let mut last_err: Option<String> = None;

        for (idx, base_url) in self.base_urls.iter().enumerate() {
            let url = Self::build_url(base_url, method, query_string);
            let has_next = idx + 1 < self.base_urls.len();

            let mut request = self
                .client
                .post(&url)
                .bearer_auth(access_token)
                .header("Content-Type", "application/json")
                .header("User-Agent", &self.user_agent)
                .json(body);
            for (name, value) in extra_headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        if idx > 0 {
                            tracing::info!(
                                "Upstream fallback succeeded | endpoint: {} | status: {}",
                                base_url,
                                status
                            );
                        }
                        return Ok(resp);
                    }
                    if has_next && Self::should_try_next_endpoint(status) {
                        tracing::warn!(
                            "Upstream endpoint {} returned {} (method={}), trying next endpoint",
                            base_url,
                            status,
                            method
                        );
                        last_err = Some(format!("Upstream {} returned {}", base_url, status));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    let msg = format!("HTTP request failed at {}: {}", base_url, e);
                    tracing::warn!("{}", msg);
                    last_err = Some(msg);
                    if !has_next {
                        break;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "All upstream endpoints failed".to_string()))
    }
}

fn resolve_base_urls() -> Vec<String> {
    for key in [
        constants::ENV_INTERNAL_BASE_URLS,
        constants::ENV_INTERNAL_BASE_URLS_ALT,
    ] {
        if let Ok(raw) = std::env::var(key) {
            let parsed = parse_base_urls(&raw);
            if !parsed.is_empty() {
                tracing::info!("Internal base URLs overridden via {}: {:?}", key, parsed);
                return parsed;
            }
        }
    }
    vec![
        constants::INTERNAL_BASE_URL_PROD.to_string(),
        constants::INTERNAL_BASE_URL_DAILY.to_string(),
    ]
}

fn parse_base_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// Prefers the upstream's own error.message when the body carries one.
pub fn extract_upstream_error_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
            if let Some(message) = json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
            {
                if !message.is_empty() {
                    return format!("HTTP {}: {}", status, message);
                }
            }
        }
    }
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, trimmed)
    }
}
