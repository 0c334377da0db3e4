//! gatewatch -- access-log analytics for security-monitoring dashboards.
//!
//! This crate aggregates access events from an event store, decomposes the
//! granted-access series into trend, seasonal and residual components, and
//! serves an hour-of-day probability that access is granted.

pub mod analysis;
pub mod api;
pub mod config;
pub mod storage;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::GatewatchConfig;

/// Start the gatewatch daemon: open the event store, train the model, and
/// serve the HTTP API until interrupted.
pub async fn serve(config: &GatewatchConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.database.path.to_string_lossy().into_owned();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;
    let source = Arc::new(storage::SqliteEventSource::new(pool));
    let state = api::AppState::new(source, config)?;

    // 2. Train the access model once before taking traffic
    let trainer = state.clone();
    match tokio::task::spawn_blocking(move || trainer.retrain()).await? {
        Ok(model) => tracing::info!(samples = model.samples, "Startup training complete"),
        Err(e) => tracing::warn!(
            error = %e,
            kind = e.kind(),
            "Startup training failed; predictions unavailable until retrained"
        ),
    }

    // 3. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    let app = api::router(state);

    tracing::info!(%addr, "gatewatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
