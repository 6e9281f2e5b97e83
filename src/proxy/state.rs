use crate::proxy::dispatch::Dispatcher;
use crate::proxy::token::TokenPool;
use crate::proxy::upstream::UpstreamClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct CoreServices {
    pub pool: Arc<TokenPool>,
    pub upstream: Arc<UpstreamClient>,
    pub dispatcher: Arc<Dispatcher>,
}

#[derive(Clone)]
pub struct ConfigState {
    pub api_key: Arc<RwLock<String>>,
    pub custom_mapping: Arc<RwLock<HashMap<String, String>>>,
    pub anthropic_mapping: Arc<RwLock<HashMap<String, String>>>,
    pub request_timeout: u64,
    pub port: u16,
}

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<CoreServices>,
    pub config: Arc<ConfigState>,
}

// Lets the auth middleware pull just the API key out of the app state.
impl axum::extract::FromRef<AppState> for Arc<RwLock<String>> {
    fn from_ref(state: &AppState) -> Self {
        state.config.api_key.clone()
    }
}

#[derive(Clone)]
pub struct ModelCatalogState {
    pub custom_mapping: Arc<RwLock<HashMap<String, String>>>,
}

impl axum::extract::FromRef<AppState> for ModelCatalogState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            custom_mapping: state.config.custom_mapping.clone(),
        }
    }
}
