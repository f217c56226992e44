//! Routers for the two relay stages.

use axum::{
    extract::{Path, Query, Request, State},
    response::Response,
    routing::any,
    Router,
};
use serde::Deserialize;
use sqlrelay_validation::{InboundRequest, ValidationVerdict};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::forward::Relay;
use crate::health;

#[derive(Debug, Deserialize)]
struct RouteParams {
    route: String,
    #[serde(default)]
    statement: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    #[serde(default)]
    query: Option<String>,
}

/// Gatekeeper: every path and method goes downstream untouched.
pub fn gatekeeper_router(relay: Relay) -> Router {
    Router::new()
        .merge(health::routes())
        .fallback(forward_any)
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

/// Trusted host: validate, then forward.
pub fn trusted_host_router(relay: Relay) -> Router {
    Router::new()
        .merge(health::routes())
        .route("/{route}", any(validate_and_forward))
        .route("/{route}/{*statement}", any(validate_and_forward))
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

async fn forward_any(State(relay): State<Relay>, request: Request) -> Result<Response, RelayError> {
    let (parts, body) = request.into_parts();
    let body = relay.read_body(body).await?;
    relay
        .forward(parts.method, &parts.uri, &parts.headers, body)
        .await
}

async fn validate_and_forward(
    State(relay): State<Relay>,
    Path(params): Path<RouteParams>,
    request: Request,
) -> Result<Response, RelayError> {
    let (parts, body) = request.into_parts();
    let body = relay.read_body(body).await?;

    let query_param = Query::<QueryParams>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.query);

    let mut inbound = InboundRequest::new(parts.method.as_str()).with_body(body.clone());
    if let Some(statement) = params.statement.filter(|s| !s.is_empty()) {
        inbound = inbound.with_path_statement(statement);
    }
    if let Some(sql) = query_param {
        inbound = inbound.with_query_param(sql);
    }

    let validator = relay.policy().validator_for(&params.route);
    match validator.validate(&inbound) {
        ValidationVerdict::Pass { shape } => {
            debug!(route = %params.route, shape = %shape, "Request validated");
        }
        ValidationVerdict::Fail { reason } => {
            warn!(
                route = %params.route,
                method = %parts.method,
                reason = %reason,
                "Request rejected"
            );
            return Err(RelayError::Rejected(reason));
        }
    }

    relay
        .forward(parts.method, &parts.uri, &parts.headers, body)
        .await
}
