pub mod constants;
pub mod error;
pub mod models;
pub mod proxy;
#[cfg(test)]
pub mod test_utils;

use tracing::error;

pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub async fn run() {
    let data_dir = models::default_data_dir();
    let mut config = match models::AppConfig::load(&data_dir) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    config.apply_env_overrides();

    if !config.proxy.enabled {
        tracing::warn!("Proxy is disabled in configuration; exiting");
        return;
    }

    if let Err(e) = proxy::server::serve(config.proxy, data_dir).await {
        error!("Proxy terminated with an error: {}", e);
        std::process::exit(1);
    }
}
