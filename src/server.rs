//! HTTP trigger for scheduled invocations
//!
//! `POST /ingest` (or `GET`) runs one invocation and always answers 200 with the
//! [`BatchReport`] as JSON. Triggers are single-flight: a second trigger waits for the
//! running one to finish before it starts its own batch.

use async_trait::async_trait;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::orchestrator::{run_invocation, BatchReport};
use crate::store::LeadStore;

/// Something that performs one full invocation
#[async_trait]
pub trait IngestRunner: Send + Sync {
    async fn run(&self) -> BatchReport;
}

/// Runs against the configured mailbox and store
pub struct LiveRunner {
    config: Config,
    store: Arc<dyn LeadStore>,
}

impl LiveRunner {
    pub fn new(config: Config, store: Arc<dyn LeadStore>) -> Self {
        Self { config, store }
    }
}

#[async_trait]
impl IngestRunner for LiveRunner {
    async fn run(&self) -> BatchReport {
        run_invocation(&self.config, self.store.as_ref()).await
    }
}

pub struct AppState {
    runner: Arc<dyn IngestRunner>,
    in_flight: Mutex<()>,
}

impl AppState {
    pub fn new(runner: Arc<dyn IngestRunner>) -> Self {
        Self {
            runner,
            in_flight: Mutex::new(()),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ingest", get(trigger_ingest).post(trigger_ingest))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn trigger_ingest(State(state): State<Arc<AppState>>) -> Json<BatchReport> {
    let _guard = state.in_flight.lock().await;
    info!("Ingest triggered");
    Json(state.runner.run().await)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Bind and serve until Ctrl+C or SIGTERM
pub async fn serve(bind_address: &str, runner: Arc<dyn IngestRunner>) -> Result<()> {
    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        IngestError::ConfigError(format!("Invalid bind address '{}': {}", bind_address, e))
    })?;

    let app = build_router(Arc::new(AppState::new(runner)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
