//! slawatch -- SLA violation prediction and anomaly detection for network telemetry.
//!
//! This crate provides the scoring pipeline (feature contract, scaler, risk
//! classifier, anomaly detector, explainer, rule-based fallbacks), the offline
//! trainer that produces its artifacts, a SQLite telemetry store, exports,
//! alert delivery, and the HTTP API that ties them together.

pub mod alerts;
pub mod api;
pub mod config;
pub mod export;
pub mod features;
pub mod ml;
pub mod storage;
pub mod train;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;

/// Start the slawatch daemon: load models, open storage, serve the API.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Initialize storage
    let db_path = config.storage.db_path.clone();
    tracing::info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(&db_path, config.storage.pool_size)?;

    // 2. Load models before accepting requests
    let predictor = Arc::new(ml::SlaPredictor::new(
        config.models.dir.clone(),
        config.models.scoring.clone(),
        config.models.fallback.clone(),
    ));
    let loader = predictor.clone();
    tokio::task::spawn_blocking(move || loader.load())
        .await
        .context("model loading task failed")?;

    // 3. Alert channels
    let alerts = alerts::AlertService::from_config(&config.alerts);
    if !alerts.is_configured() {
        tracing::warn!("no alert channels configured, alerts will be logged only");
    }

    // 4. Start API server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let state = api::state::AppState::new(pool, predictor, alerts, config);
    let app = api::router(state);

    tracing::info!(%addr, "slawatch listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("slawatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
