use crate::error::{AppError, AppResult};
use crate::proxy::config::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl AppConfig {
    // Loads `trestle.json` from the data dir. A missing file is not an
    // error; defaults apply.
    pub fn load(data_dir: &Path) -> AppResult<Self> {
        let path = data_dir.join("trestle.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    // PORT and API_KEY override the config file in headless operation.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("API_KEY") {
            if !key.trim().is_empty() {
                tracing::info!("Using API key from environment");
                self.proxy.api_key = key.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            let trimmed = port.trim();
            if !trimmed.is_empty() {
                match trimmed.parse::<u16>() {
                    Ok(p) if p > 0 => {
                        self.proxy.port = p;
                        tracing::info!("Using proxy port from environment: {}", p);
                    }
                    _ => tracing::warn!("ignoring invalid PORT value: {}", port),
                }
            }
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    std::env::var("TRESTLE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs_home()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".trestle")
        })
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
