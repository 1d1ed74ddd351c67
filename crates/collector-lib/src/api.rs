//! HTTP API for health checks and Prometheus metrics
//!
//! - `/healthz`: 200 while every component is at least degraded, 503 otherwise
//! - `/readyz`: 200 once every watched kind finished its initial list
//! - `/metrics`: Prometheus text exposition of the process registry

use crate::health::HealthRegistry;
use crate::observability::CollectorMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: CollectorMetrics,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: CollectorMetrics) -> Self {
        Self {
            health_registry,
            metrics,
        }
    }
}

fn status_for(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn liveness(State(state): State<Arc<AppState>>) -> Response {
    let health = state.health_registry.health().await;
    (status_for(health.status.is_operational()), Json(health)).into_response()
}

async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    let readiness = state.health_registry.readiness().await;
    (status_for(readiness.ready), Json(readiness)).into_response()
}

async fn exposition() -> Response {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(exposition))
        .with_state(state)
}

/// Bind `0.0.0.0:port` and serve until the task is dropped
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "API server listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
