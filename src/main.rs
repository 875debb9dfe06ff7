mod api;
mod config;
mod data;
mod execution;
mod forecast;
mod monitoring;

use anyhow::{Context, Result};
use config::{Config, EnvConfig};
use data::webdriver::WebDriverBrowser;
use execution::persistence::{recover_interrupted_runs, RecordStore};
use execution::pipeline::PricePipeline;

const CONFIG_ENV: &str = "MANDI_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let env_config = EnvConfig::load()?;

    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    config.apply_env(&env_config);

    monitoring::logger::init_tracing(&config.monitoring)?;

    tracing::info!("Mandi price forecaster starting...");
    tracing::info!("Configuration: {}", config_path);
    tracing::info!("Portal: {}", config.portal.url);
    tracing::info!("WebDriver: {} (headless: {})", env_config.webdriver_url, env_config.headless);
    tracing::info!("Lookback: {} days", config.system.lookback_days);

    let browser = WebDriverBrowser::new(
        env_config.webdriver_url.clone(),
        env_config.headless,
        config.navigator.page_load_timeout(),
    )?;
    let mut pipeline = PricePipeline::new(browser, &config)?;

    // Initialize database
    if let Some(path) = &config.system.database_path {
        tracing::info!("Initializing database: {}", path);
        let store = RecordStore::new(path)?;
        recover_interrupted_runs(&store)?;
        pipeline = pipeline.with_store(store);
    }

    let app = api::router(pipeline, &config.server.allowed_origin)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
