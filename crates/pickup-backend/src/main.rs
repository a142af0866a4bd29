//! Pickup Backend Service
//!
//! REST API for disposal items, QR codes, scan confirmation and pickup requests

use anyhow::{Context, Result};
use pickup_backend::{create_router, AppState, Config, MemoryStore, RedisStore};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pickup_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pickup Backend Service");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  API address: {}", config.api_address());
    info!("  QR module size: {}px", config.qr_module_size);

    let state = if config.in_memory_store {
        warn!("IN_MEMORY_STORE=true, data will not survive a restart");
        AppState::new(MemoryStore::new(), config.qr_module_size)
    } else {
        info!("  Redis URL: {}", config.redis_url);
        let storage = RedisStore::new(&config.redis_url)
            .await
            .context("Failed to initialize storage")?;
        AppState::new(storage, config.qr_module_size)
    };

    let app = create_router(state);

    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Pickup Backend Service running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
        })
        .await
        .context("Server error")?;

    Ok(())
}
