mod archive;
mod config;
mod gateway;
mod gemini;
mod limiter;
mod models;
mod persistence;
mod presets;
mod prompt;
mod retry;
mod routes;
mod store;
mod studio;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::gemini::GeminiClient;
use crate::limiter::LimitedGateway;
use crate::models::Settings;
use crate::persistence::{spawn_writer, SessionArchive};
use crate::retry::RetryingGateway;
use crate::routes::AppState;
use crate::store::SessionStore;
use crate::studio::Studio;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env()?;
    if config.is_demo() {
        tracing::warn!("GEMINI_API_KEY not set, serving placeholder images");
    } else {
        tracing::info!("Using API key: {}...", config.api_key.chars().take(10).collect::<String>());
    }

    let gateway = LimitedGateway::new(
        RetryingGateway::new(GeminiClient::new(config.api_key.clone(), config.api_base.clone()), config.retry),
        config.generation_concurrency,
        config.caption_concurrency,
    );

    let archive = Arc::new(SessionArchive::new(config.state_path.clone()));
    let persisted = archive
        .load()
        .with_context(|| format!("failed to load session from {}", archive.path().display()))?;
    tracing::info!(
        rounds = persisted.feed.len(),
        archived = persisted.history.len(),
        path = %archive.path().display(),
        "Session loaded"
    );

    let store = Arc::new(SessionStore::new(Settings::default(), persisted));
    let writer = spawn_writer(archive.clone(), store.clone());
    let studio = Arc::new(Studio::new(store.clone(), Arc::new(gateway)));
    let app = routes::router(AppState { studio });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    writer.abort();
    archive.save(&store.persisted())?;
    tracing::info!("Session saved, shutting down");
    Ok(())
}
