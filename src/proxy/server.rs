use crate::error::AppResult;
use crate::proxy::config::ProxyConfig;
use crate::proxy::dispatch::Dispatcher;
use crate::proxy::handlers::{claude, gemini, openai};
use crate::proxy::middleware::auth::auth_middleware;
use crate::proxy::state::{AppState, ConfigState, CoreServices};
use crate::proxy::token::{FileAccountStore, GoogleTokenRefresher, TokenPool};
use crate::proxy::upstream::UpstreamClient;
use axum::{
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn build_app_state(config: &ProxyConfig, data_dir: &Path) -> AppState {
    let store = Arc::new(FileAccountStore::new(data_dir));
    let refresher = Arc::new(GoogleTokenRefresher::new());
    let pool = Arc::new(TokenPool::new(store, refresher));
    match pool.reload().await {
        Ok(count) => info!("Loaded {} account(s) into the pool", count),
        Err(e) => warn!("Initial account load failed: {}", e),
    }
    pool.start_cooldown_sweeper().await;

    let upstream = Arc::new(UpstreamClient::new(
        config.request_timeout,
        &config.upstream_proxy,
    ));
    let custom_mapping = Arc::new(RwLock::new(config.custom_mapping.clone()));
    let anthropic_mapping = Arc::new(RwLock::new(config.anthropic_mapping.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        upstream.clone(),
        custom_mapping.clone(),
        anthropic_mapping.clone(),
    ));

    AppState {
        core: Arc::new(CoreServices {
            pool,
            upstream,
            dispatcher,
        }),
        config: Arc::new(ConfigState {
            api_key: Arc::new(RwLock::new(config.api_key.clone())),
            custom_mapping,
            anthropic_mapping,
            request_timeout: config.request_timeout,
            port: config.port,
        }),
    }
}

pub fn build_router(state: AppState) -> Router {
    let api_key = state.config.api_key.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        // OpenAI-compatible surface
        .route("/v1/models", get(openai::handle_list_models))
        .route("/v1/chat/completions", post(openai::handle_chat_completions))
        .route("/v1/completions", post(openai::handle_completions))
        .route("/v1/responses", post(openai::handle_responses))
        .route("/v1/images/generations", post(openai::handle_images_generations))
        .route("/v1/images/edits", post(openai::handle_images_edits))
        .route(
            "/v1/audio/transcriptions",
            post(openai::handle_audio_transcriptions),
        )
        // Anthropic-compatible surface
        .route("/v1/messages", post(claude::handle_messages))
        .route("/v1/messages/count_tokens", post(claude::handle_count_tokens))
        // Gemini-compatible surface
        .route("/v1beta/models", get(gemini::handle_list_models))
        .route(
            "/v1beta/models/:model",
            get(gemini::handle_get_model).post(gemini::handle_generate),
        )
        .route(
            "/v1beta/models/:model/countTokens",
            post(gemini::handle_count_tokens),
        )
        .layer(middleware::from_fn_with_state(api_key, auth_middleware))
        .with_state(state)
}

pub async fn serve(config: ProxyConfig, data_dir: std::path::PathBuf) -> AppResult<()> {
    let state = build_app_state(&config, &data_dir).await;
    let pool = state.core.pool.clone();
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Proxy listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    pool.shutdown().await;
    Ok(())
}
