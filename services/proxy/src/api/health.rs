//! Health check endpoints.
//!
//! The proxy has one startup-time dependency worth reporting: its tunnels.
//! A tunnel that failed at startup leaves the replica out of rotation, so
//! the service still serves but reports itself as degraded.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::{AppState, TunnelStatus};

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    /// Tunnel details.
    pub components: ComponentHealth,
}

/// Component health details.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ComponentHealth {
    pub tunnels: TunnelHealth,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct TunnelHealth {
    /// Status: "ok" or "degraded".
    pub status: String,

    /// Replicas reached through a live tunnel.
    pub established: Vec<String>,

    /// Replicas whose tunnel failed at startup.
    pub failed: Vec<String>,
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/livez", get(livez))
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(health_response(state.tunnels()))
}

/// Liveness check. No body.
async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

fn health_response(tunnels: &TunnelStatus) -> HealthResponse {
    let status = if tunnels.is_degraded() { "degraded" } else { "ok" };

    HealthResponse {
        status: status.to_string(),
        service: "proxy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        components: ComponentHealth {
            tunnels: TunnelHealth {
                status: status.to_string(),
                established: tunnels.established.clone(),
                failed: tunnels.failed.clone(),
            },
        },
    }
}
