//! Filedrop API Server
//!
//! Main entry point for the Filedrop file storage service.

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filedrop_api::{AppState, create_router};
use filedrop_core::storage::StorageSettings;
use filedrop_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filedrop=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    tokio::fs::create_dir_all(&config.files.chunk_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.files.chunk_dir.display()))?;

    // Resolve storage up front so a misconfiguration shows in the startup log
    let settings = StorageSettings::from_app_config(&config);
    let state = AppState::new(settings, config.files.clone());
    let storage = state.storage.get().await?;
    info!(
        configured = %config.storage.provider,
        active = %storage.kind(),
        base_url = %config.files.base_url,
        "Storage configured"
    );

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
