use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    // Empty disables request authentication.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub backend_canary_enabled: bool,
    // Seconds; the upstream client clamps to a 1s minimum.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    // Exact or wildcard ("gpt-5*") model overrides, applied before family
    // and static routing.
    #[serde(default)]
    pub custom_mapping: HashMap<String, String>,
    // Claude family-group overrides (claude-4.5-series, claude-3.5-series,
    // claude-default). Merged at family priority, never above custom exacts.
    #[serde(default)]
    pub anthropic_mapping: HashMap<String, String>,
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8045
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            api_key: String::new(),
            auto_start: false,
            backend_canary_enabled: false,
            request_timeout: default_request_timeout(),
            custom_mapping: HashMap::new(),
            anthropic_mapping: HashMap::new(),
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let config = ProxyConfig::default();
        assert_eq!(config.port, 8045);
        assert_eq!(config.request_timeout, 120);
        assert!(config.enabled);
        assert!(!config.upstream_proxy.enabled);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ProxyConfig = serde_json::from_str(r#"{"api_key":"k"}"#).unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.port, 8045);
    }
}
