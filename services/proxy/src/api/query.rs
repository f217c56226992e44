//! Query routes.
//!
//! `/{route}` and `/{route}/{*statement}`, any method. The statement comes
//! from the path, the `query` parameter (GET) or the JSON body field `query`.
//! The proxy does not validate; that happened upstream.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use sqlrelay_cluster::{Endpoint, RoutingStrategy};
use sqlrelay_validation::{extract_statement, InboundRequest};
use tracing::{error, info};

use crate::api::error::ApiError;
use crate::db::QueryResult;
use crate::state::AppState;

/// Response header naming the backend that served the request.
pub const BACKEND_HEADER: &str = "x-sqlrelay-backend";

#[derive(Debug, Deserialize)]
pub struct RouteParams {
    route: String,
    #[serde(default)]
    statement: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    query: Option<String>,
}

/// Run one statement on the backend chosen by the route's strategy.
pub async fn run_query(
    State(state): State<AppState>,
    method: Method,
    Path(params): Path<RouteParams>,
    Query(query): Query<QueryParams>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let strategy = resolve_strategy(&params.route, state.default_strategy())?;

    let mut request = InboundRequest::new(method.as_str()).with_body(body);
    if let Some(statement) = params.statement.filter(|s| !s.is_empty()) {
        request = request.with_path_statement(statement);
    }
    if let Some(sql) = query.query {
        request = request.with_query_param(sql);
    }

    let sql = extract_statement(&request).map_err(|reason| {
        ApiError::bad_request(reason.code(), "request carries no usable statement")
    })?;

    let backend = state.selector().select(strategy).await;

    let result = match state
        .executor()
        .execute(&backend, &sql, state.fetch_mode())
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!(
                strategy = %strategy,
                backend = %backend,
                name = %backend.name,
                error = %e,
                "Query failed"
            );
            return Err(ApiError::from(e).with_backend(backend.name.clone()));
        }
    };

    info!(
        strategy = %strategy,
        backend = %backend,
        name = %backend.name,
        rows = result.rows.len(),
        "Query served"
    );

    Ok(render(strategy, &backend, &result))
}

fn resolve_strategy(route: &str, default: RoutingStrategy) -> Result<RoutingStrategy, ApiError> {
    RoutingStrategy::for_route(route, default).ok_or_else(|| {
        ApiError::not_found("unknown_route", format!("no route named '{route}'"))
            .with_instance(format!("/{route}"))
    })
}

fn render(strategy: RoutingStrategy, backend: &Endpoint, result: &QueryResult) -> Response {
    let body = format!(
        "<h1>{} route</h1><h2>Received from {}:{} ({})</h2>\n<p>{}</p>",
        strategy.label(),
        escape_html(&backend.host),
        backend.port,
        escape_html(&backend.name),
        escape_html(&result.to_json().to_string()),
    );

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&backend.name) {
        response.headers_mut().insert(BACKEND_HEADER, value);
    }
    response
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
