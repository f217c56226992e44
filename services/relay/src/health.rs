//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::forward::Relay;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status. Always "ok" while the process serves.
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    /// Next stage in the pipeline.
    pub downstream: String,
}

/// Create health check routes.
pub fn routes() -> Router<Relay> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(livez))
}

/// Basic health check. Does not call downstream.
async fn healthz(State(relay): State<Relay>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: relay.stage().name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        downstream: relay.downstream_url().to_string(),
    })
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}
