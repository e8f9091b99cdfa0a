//! HTTP API for health checks and executor status

use crate::config::ApiConfig;
use crate::error::{AirdropError, AirdropResult};
use crate::executor::{Executor, ExecutorStatus};

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
    pub network: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(executor: Arc<Executor>, network: impl Into<String>) -> Self {
        Self {
            executor,
            network: network.into(),
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> AirdropResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AirdropError::Internal(format!("api bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AirdropError::Internal(format!("api server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Executor snapshot
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let uptime = Utc::now() - state.started_at;
    let target = state.executor.target();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        network: state.network.clone(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        contract: format!("{}.{}::{}", target.address, target.name, target.function),
        executor: state.executor.status().await,
    })
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    network: String,
    uptime_seconds: u64,
    contract: String,
    executor: ExecutorStatus,
}
