// Cricket Auction - Web Server
// REST API + WebSocket notifications with Axum

use anyhow::{Context, Result};
use cricket_auction::api::{router, AppState};
use cricket_auction::{Config, Database, EventNotifier, LocalObjectStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cricket_auction=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🏏 Cricket Auction - Web Server");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(?config, "Configuration loaded");

    // Open database (schema is created on first run)
    let db = Database::open(&config.database_path, config.storage_timeout)?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload dir {:?}", config.upload_dir))?;
    let objects = Arc::new(LocalObjectStore::new(
        &config.upload_dir,
        &config.public_base_url,
        config.storage_timeout,
    ));

    let state = AppState::new(db, objects, EventNotifier::new(config.notifier_capacity));
    let app = router(state, &config.upload_dir, &config.allowed_origins);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("🚀 Server running on http://localhost:{}", config.port);
    tracing::info!("   API:       http://localhost:{}/api/players", config.port);
    tracing::info!("   WebSocket: ws://localhost:{}/ws", config.port);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
