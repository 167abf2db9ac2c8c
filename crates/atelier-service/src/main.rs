//! Atelier Service - HTTP API for credits and image generation
//!
//! This is the main entry point for the atelier service.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_provider::ImageProvider;
use atelier_service::{build_provider, create_router, AppState, ServiceConfig};
use atelier_store::PgStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,atelier=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Atelier Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        postgres_configured = %config.database_url.is_some(),
        auth_configured = %config.auth_jwt_secret.is_some(),
        provider_kind = ?config.provider.kind,
        generation_cost = config.pricing.generation_cost,
        "Service configuration loaded"
    );

    let poll_budget = config.provider.poll_interval * config.provider.max_attempts;
    if Duration::from_secs(config.request_timeout_seconds) <= poll_budget {
        tracing::warn!(
            request_timeout_seconds = config.request_timeout_seconds,
            poll_budget_seconds = poll_budget.as_secs(),
            "Request timeout does not exceed the provider poll budget"
        );
    }

    // Fail fast on pricing or provider misconfiguration
    config.pricing.validate()?;
    let provider = build_provider(&config.provider)?;

    // Build app state over the selected backend
    let state = if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL store");
        let store = PgStore::connect(url).await?;
        store.migrate().await?;
        AppState::new(Arc::new(store), provider, config.clone())
    } else {
        local_state(provider, &config)?
    };

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "rocksdb-backend")]
fn local_state(
    provider: Arc<dyn ImageProvider>,
    config: &ServiceConfig,
) -> Result<AppState, Box<dyn std::error::Error>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    let store = atelier_store::RocksStore::open(&config.data_dir)?;
    Ok(AppState::new(Arc::new(store), provider, config.clone()))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn local_state(
    provider: Arc<dyn ImageProvider>,
    config: &ServiceConfig,
) -> Result<AppState, Box<dyn std::error::Error>> {
    tracing::warn!("No DATABASE_URL and RocksDB not compiled in - using in-memory store, data will not persist");
    Ok(AppState::new(
        Arc::new(atelier_store::MemoryStore::new()),
        provider,
        config.clone(),
    ))
}
