//! Forwarding to the next stage.
//!
//! A relay receives a request, optionally validates it, forwards it to its
//! downstream stage and hands the downstream response back unchanged. There
//! is no retry: a failed hop becomes a `500`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, HeaderName, Method, Uri},
    response::Response,
};
use bytes::Bytes;
use sqlrelay_cluster::RoutingStrategy;
use sqlrelay_validation::Validator;
use tracing::{debug, error};

use crate::error::RelayError;

/// Headers dropped on both legs. `Host` names the wrong hop after
/// forwarding; the framing headers are recomputed by the local client and
/// server.
const STRIPPED_HEADERS: [HeaderName; 3] = [
    header::HOST,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Pipeline position of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Public entry point. Never inspects payloads.
    Gatekeeper,
    /// Internal hop. Sole validation authority.
    TrustedHost,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gatekeeper => "gatekeeper",
            Self::TrustedHost => "trusted-host",
        }
    }
}

/// Which validator applies to a route.
///
/// Read-only routes are keyed by strategy, so every alias of a route
/// (`custom`, `latency`, `query` under a matching default) gets the same
/// validator.
#[derive(Debug, Clone, Default)]
pub struct ValidationPolicy {
    /// Read-only mode for every route.
    pub read_only: bool,
    /// Strategies forced into read-only mode.
    pub read_only_strategies: HashSet<RoutingStrategy>,
    /// Strategy the proxy serves under the `query` route.
    pub default_strategy: RoutingStrategy,
}

impl ValidationPolicy {
    pub fn validator_for(&self, route: &str) -> Validator {
        let read_only = self.read_only
            || RoutingStrategy::for_route(route, self.default_strategy)
                .is_some_and(|strategy| self.read_only_strategies.contains(&strategy));

        if read_only {
            Validator::read_only()
        } else {
            Validator::general()
        }
    }
}

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Base URL of the next stage, without trailing slash.
    pub downstream_url: String,
    /// Timeout for the whole downstream exchange.
    pub timeout: Duration,
    /// Largest inbound body accepted.
    pub max_body_bytes: usize,
}

/// A relay stage. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    stage: Stage,
    client: reqwest::Client,
    downstream_url: String,
    max_body_bytes: usize,
    policy: ValidationPolicy,
}

impl Relay {
    pub fn new(
        stage: Stage,
        settings: RelaySettings,
        policy: ValidationPolicy,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(RelayError::Client)?;

        Ok(Self {
            inner: Arc::new(RelayInner {
                stage,
                client,
                downstream_url: settings.downstream_url.trim_end_matches('/').to_string(),
                max_body_bytes: settings.max_body_bytes,
                policy,
            }),
        })
    }

    pub fn stage(&self) -> Stage {
        self.inner.stage
    }

    pub fn downstream_url(&self) -> &str {
        &self.inner.downstream_url
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.inner.policy
    }

    /// Collect an inbound body within the configured limit.
    pub async fn read_body(&self, body: Body) -> Result<Bytes, RelayError> {
        to_bytes(body, self.inner.max_body_bytes)
            .await
            .map_err(|e| RelayError::Body(e.to_string()))
    }

    /// Forward one request and relay the downstream response.
    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, RelayError> {
        let url = downstream_url(&self.inner.downstream_url, uri);
        debug!(stage = self.stage().name(), method = %method, url = %url, "Forwarding request");

        let downstream = self
            .inner
            .client
            .request(method, &url)
            .headers(without_stripped(headers))
            .body(body)
            .send()
            .await
            .map_err(|source| {
                error!(stage = self.stage().name(), url = %url, error = %source, "Downstream request failed");
                RelayError::Downstream {
                    url: url.clone(),
                    source,
                }
            })?;

        let status = downstream.status();
        let headers = without_stripped(downstream.headers());
        let body = downstream
            .bytes()
            .await
            .map_err(|source| RelayError::Downstream {
                url: url.clone(),
                source,
            })?;

        debug!(
            stage = self.stage().name(),
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            "Relaying downstream response"
        );

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Downstream base plus the original path and query.
fn downstream_url(base: &str, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("{base}{path_and_query}")
}

fn without_stripped(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !STRIPPED_HEADERS.contains(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}
