use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlrelay_cluster::RoutingStrategy;

use crate::forward::{RelaySettings, ValidationPolicy};

/// Default downstream timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Default inbound body limit (2 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub downstream_url: String,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
    /// Trusted host only.
    pub read_only: bool,
    /// Trusted host only. Route names resolved to their strategies.
    pub read_only_routes: HashSet<RoutingStrategy>,
    /// Trusted host only. Must match the proxy's default strategy.
    pub default_strategy: RoutingStrategy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env(default_listen_addr: &str) -> Result<Self> {
        let listen_addr = std::env::var("SQLRELAY_LISTEN_ADDR")
            .unwrap_or_else(|_| default_listen_addr.to_string())
            .parse()
            .context("invalid SQLRELAY_LISTEN_ADDR")?;

        let log_level = std::env::var("SQLRELAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let downstream_url =
            std::env::var("SQLRELAY_DOWNSTREAM_URL").context("SQLRELAY_DOWNSTREAM_URL must be set")?;

        let upstream_timeout = match std::env::var("SQLRELAY_UPSTREAM_TIMEOUT_MS") {
            Ok(value) => Duration::from_millis(
                value
                    .parse()
                    .context("invalid SQLRELAY_UPSTREAM_TIMEOUT_MS")?,
            ),
            Err(_) => DEFAULT_UPSTREAM_TIMEOUT,
        };

        let max_body_bytes = match std::env::var("SQLRELAY_MAX_BODY_BYTES") {
            Ok(value) => value.parse().context("invalid SQLRELAY_MAX_BODY_BYTES")?,
            Err(_) => DEFAULT_MAX_BODY_BYTES,
        };

        let read_only = std::env::var("SQLRELAY_READ_ONLY")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let default_strategy = match std::env::var("SQLRELAY_DEFAULT_STRATEGY") {
            Ok(value) => value.parse().context("invalid SQLRELAY_DEFAULT_STRATEGY")?,
            Err(_) => RoutingStrategy::default(),
        };

        let read_only_routes = match std::env::var("SQLRELAY_READ_ONLY_ROUTES") {
            Ok(value) => parse_routes(&value, default_strategy)
                .context("invalid SQLRELAY_READ_ONLY_ROUTES")?,
            Err(_) => HashSet::new(),
        };

        Ok(Self {
            listen_addr,
            log_level,
            downstream_url,
            upstream_timeout,
            max_body_bytes,
            read_only,
            read_only_routes,
            default_strategy,
        })
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            downstream_url: self.downstream_url.clone(),
            timeout: self.upstream_timeout,
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            read_only: self.read_only,
            read_only_strategies: self.read_only_routes.clone(),
            default_strategy: self.default_strategy,
        }
    }
}

fn parse_routes(list: &str, default: RoutingStrategy) -> Result<HashSet<RoutingStrategy>> {
    list.split(',')
        .map(str::trim)
        .filter(|route| !route.is_empty())
        .map(|route| {
            RoutingStrategy::for_route(route, default)
                .with_context(|| format!("unknown route '{route}'"))
        })
        .collect()
}
