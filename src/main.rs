// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::cache::SeriesCache;
use crate::application::history_service::HistoryService;
use crate::infrastructure::config::load_config;
use crate::infrastructure::influx_repository::InfluxRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    health_check, sensor_chart, sensor_heatmap, sensor_history, sensor_history_csv,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sensor_history=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = load_config().context("Failed to load configuration")?;

    // Create repository (infrastructure layer)
    let repository = Arc::new(InfluxRepository::new(config.influx));

    // Create services (application layer)
    let cache = Arc::new(SeriesCache::new(
        config.pipeline.cache_ttl(),
        config.pipeline.cache_max_entries,
    ));
    let history_service = HistoryService::new(repository, cache.clone(), config.pipeline);

    // Create application state
    let state = Arc::new(AppState { history_service });

    // Build router (presentation layer)
    // Compression is negotiated per handler, so no CompressionLayer here
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/sensors/:id/history", get(sensor_history))
        .route("/sensors/:id/history.csv", get(sensor_history_csv))
        .route("/sensors/:id/chart", get(sensor_chart))
        .route("/sensors/:id/heatmap", get(sensor_heatmap))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!("Starting sensor-history service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache.clear();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
