//! HTTP API handlers and routing.

pub mod error;
mod health;
mod query;

pub use query::BACKEND_HEADER;

use axum::{routing::any, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the proxy router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .merge(health::routes())
        // Query routes
        .route("/{route}", any(query::run_query))
        .route("/{route}/{*statement}", any(query::run_query))
        // Middleware
        .layer(TraceLayer::new_for_http())
        // Application state
        .with_state(state)
}
