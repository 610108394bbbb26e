mod auth;
mod config;
mod db;
mod errors;
mod export;
mod ingest;
mod memory;
mod metrics;
mod model;
mod query;
mod rest;
mod store;
mod validate;

use anyhow::Context;
use clap::Parser;
use config::Config;
use memory::MemoryStore;
use std::sync::Arc;
use store::Backends;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting IoT device registry");
    info!("HTTP server: {}", config.http_addr);
    info!("Max query limit: {}", config.max_query_limit);
    if config.uses_default_admin_token() {
        warn!("ADMIN_TOKEN is not set, device registry changes accept the default token");
    }

    // Initialize metrics
    metrics::init_metrics();

    let backends = match &config.database_url {
        Some(database_url) => {
            info!("Database: {}", config.database_host().unwrap_or("***"));
            let pool = db::make_pool(
                database_url,
                config.db_max_connections,
                config.db_acquire_timeout(),
            )
            .await
            .context("failed to connect to database")?;
            Backends::from_store(Arc::new(db::PgStore::new(pool)))
        }
        None => {
            warn!("DATABASE_URL is not set, using the in-memory store");
            Backends::from_store(Arc::new(MemoryStore::new()))
        }
    };

    let app = rest::create_router(rest::AppState::new(backends, &config));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
