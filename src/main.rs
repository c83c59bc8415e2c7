//! # Altegio Booking Bot Main Entry Point
//!
//! Initializes logging, loads configuration, sets up the database, wires the
//! booking core (store, remote client, cache, state machine, dispatcher),
//! starts the expiry sweep, and serves the webhook and health endpoints.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use altegio_bot::altegio::{AltegioClient, RetryPolicy};
use altegio_bot::booking::{BookingMachine, IntentDispatcher};
use altegio_bot::bot::webhook;
use altegio_bot::cache::SlotCache;
use altegio_bot::config::Config;
use altegio_bot::database::connection::DatabaseManager;
use altegio_bot::services::expiry::ExpiryService;
use altegio_bot::services::health;
use altegio_bot::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "altegio_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Starting Altegio booking bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded - Database: {}, HTTP Port: {}, Company: {}",
        config.database_url, config.http_port, config.company_id
    );

    // Initialize database
    info!("Initializing database connection...");
    let db_manager = DatabaseManager::new(&config.database_url).await?;
    info!("Running database migrations...");
    db_manager.run_migrations().await?;
    let db_arc = Arc::new(db_manager);
    info!("Database initialized successfully");

    // Wire the booking core
    let store = Arc::new(SqliteStore::new(
        db_arc.pool.clone(),
        config.session_expiry,
    ));
    let client = Arc::new(AltegioClient::new(
        config.altegio_api_base_url.clone(),
        config.company_id,
        config.altegio_partner_token.clone(),
        config.altegio_user_token.clone(),
        RetryPolicy::new(
            config.remote_retry_max_attempts,
            config.remote_retry_base_delay,
        ),
    ));
    let slot_cache = Arc::new(SlotCache::new(client.clone(), config.slot_cache_ttl));
    let machine = Arc::new(BookingMachine::new(
        store.clone(),
        client,
        slot_cache,
        RetryPolicy::new(config.commit_max_attempts, config.retry_base_delay),
        config.commit_max_attempts,
        config.session_expiry,
    ));
    let dispatcher = Arc::new(IntentDispatcher::new(store.clone(), machine.clone()));
    info!("Booking core initialized");

    // Initialize and start the expiry/retry sweep
    let mut expiry_service =
        match ExpiryService::new(store, machine, dispatcher.clone()).await {
            Ok(service) => service,
            Err(e) => {
                tracing::error!("Failed to create expiry service: {}", e);
                return Err(anyhow::anyhow!("Failed to create expiry service: {}", e));
            }
        };

    if let Err(e) = expiry_service.start().await {
        tracing::error!("Failed to start expiry service: {}", e);
    } else {
        info!("Expiry service started successfully");
    }

    // Webhook + health on one listener
    let app = webhook::router(dispatcher, config.webhook_secret.clone())
        .merge(health::router(db_arc.clone()));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to port {}: {}", config.http_port, e))?;

    info!("HTTP server starting on port {}", config.http_port);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("HTTP server error: {}", e);
    }

    // Stop the sweep on shutdown
    if let Err(e) = expiry_service.stop().await {
        tracing::warn!("Error stopping expiry service: {}", e);
    }

    info!("Application stopped");
    Ok(())
}
