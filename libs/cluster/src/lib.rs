//! Cluster topology shared by the proxy stage.
//!
//! This library provides:
//! - Endpoint and replica descriptions for a master/replica database cluster
//! - Per-replica tunnel wiring (local alias port, bastion SSH port, remote target)
//! - Routing strategies understood by the backend selector
//! - Loading and validation of the topology document

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Loopback host used for tunnel-local aliases.
pub const LOCAL_ALIAS_HOST: &str = "127.0.0.1";

/// Default SSH port on a bastion host.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default MySQL port.
pub const DEFAULT_DB_PORT: u16 = 3306;

/// Topology errors.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The document could not be read.
    #[error("failed to read topology file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not match the schema.
    #[error("invalid topology document: {0}")]
    Parse(#[from] serde_json::Error),

    /// Structural problem in an otherwise well-formed document.
    #[error("invalid topology: {0}")]
    Invalid(String),
}

// ============================================================================
// Endpoints
// ============================================================================

/// A reachable SQL server, either directly or through a local tunnel alias.
///
/// Equality and hashing only consider `host` and `port`; `name` is for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Human-readable name (e.g. "MASTER", "SLAVE_1").
    pub name: String,

    /// Hostname or IP address.
    pub host: String,

    /// TCP port.
    #[serde(default = "default_db_port")]
    pub port: u16,
}

fn default_db_port() -> u16 {
    DEFAULT_DB_PORT
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// Endpoint on the loopback interface, as exposed by a tunnel.
    pub fn local_alias(name: impl Into<String>, port: u16) -> Self {
        Self::new(name, LOCAL_ALIAS_HOST, port)
    }

    /// `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How a replica is reached through its bastion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// Loopback port the tunnel listens on.
    pub local_port: u16,

    /// SSH port on the bastion (the replica's `host`).
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Host the bastion forwards to.
    pub remote_host: String,

    /// Port the bastion forwards to.
    #[serde(default = "default_db_port")]
    pub remote_port: u16,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// A read replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    /// Display name.
    pub name: String,

    /// Replica host. When tunneled this is the bastion the tunnel goes through.
    pub host: String,

    /// Database port when reached directly.
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Tunnel wiring, if this replica is only reachable through a bastion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelSpec>,
}

impl Replica {
    /// Direct (untunneled) endpoint for this replica.
    pub fn direct_endpoint(&self) -> Endpoint {
        Endpoint::new(self.name.clone(), self.host.clone(), self.port)
    }

    /// Address used for latency probing.
    ///
    /// Tunneled replicas are probed on their bastion SSH port, the only port
    /// known to be reachable from the proxy.
    pub fn probe_endpoint(&self) -> Endpoint {
        match &self.tunnel {
            Some(tunnel) => Endpoint::new(self.name.clone(), self.host.clone(), tunnel.ssh_port),
            None => self.direct_endpoint(),
        }
    }

    /// Whether traffic to this replica must go through a tunnel.
    pub fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }
}

// ============================================================================
// Topology
// ============================================================================

/// One master plus an ordered list of replicas.
///
/// Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub master: Endpoint,

    #[serde(default)]
    pub replicas: Vec<Replica>,
}

impl ClusterTopology {
    /// Build a topology and validate it.
    pub fn new(master: Endpoint, replicas: Vec<Replica>) -> Result<Self, TopologyError> {
        let topology = Self { master, replicas };
        topology.validate()?;
        Ok(topology)
    }

    /// Parse and validate a JSON topology document.
    pub fn from_json(document: &str) -> Result<Self, TopologyError> {
        let topology: Self = serde_json::from_str(document)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Read, parse and validate a JSON topology file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| TopologyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&document)
    }

    /// Replicas that need a tunnel.
    pub fn tunneled_replicas(&self) -> impl Iterator<Item = (&Replica, &TunnelSpec)> {
        self.replicas
            .iter()
            .filter_map(|r| r.tunnel.as_ref().map(|t| (r, t)))
    }

    fn validate(&self) -> Result<(), TopologyError> {
        if self.master.host.trim().is_empty() {
            return Err(TopologyError::Invalid("master host is empty".to_string()));
        }

        let mut names = HashSet::new();
        let mut local_ports = HashSet::new();
        for replica in &self.replicas {
            if replica.host.trim().is_empty() {
                return Err(TopologyError::Invalid(format!(
                    "replica {} has an empty host",
                    replica.name
                )));
            }
            if !names.insert(replica.name.as_str()) {
                return Err(TopologyError::Invalid(format!(
                    "duplicate replica name {}",
                    replica.name
                )));
            }
            if let Some(tunnel) = &replica.tunnel {
                if tunnel.local_port == 0 {
                    return Err(TopologyError::Invalid(format!(
                        "replica {} tunnel needs a fixed local port",
                        replica.name
                    )));
                }
                if !local_ports.insert(tunnel.local_port) {
                    return Err(TopologyError::Invalid(format!(
                        "local port {} assigned to more than one tunnel",
                        tunnel.local_port
                    )));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Routing strategies
// ============================================================================

/// Policy used to pick a backend per request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Always the master.
    #[default]
    Direct,
    /// Probe every candidate, pick the lowest mean latency.
    LatencyProbed,
    /// Uniform choice among replicas.
    Random,
}

/// Route name that stands for the configured default strategy.
pub const DEFAULT_ROUTE: &str = "query";

impl RoutingStrategy {
    /// Strategy served under `route`, with [`DEFAULT_ROUTE`] mapped to
    /// `default`. `None` for unknown routes.
    pub fn for_route(route: &str, default: RoutingStrategy) -> Option<Self> {
        if route.eq_ignore_ascii_case(DEFAULT_ROUTE) {
            return Some(default);
        }
        route.parse().ok()
    }

    /// Label used in rendered responses.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Direct => "Normal",
            Self::LatencyProbed => "Custom",
            Self::Random => "Random",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::LatencyProbed => f.write_str("latency_probed"),
            Self::Random => f.write_str("random"),
        }
    }
}

/// Unknown strategy name.
#[derive(Debug, Error)]
#[error("unknown routing strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for RoutingStrategy {
    type Err = UnknownStrategy;

    /// Accepts the route names (`normal`, `custom`, `random`) as well as the
    /// descriptive names (`direct`, `latency`, `latency_probed`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "direct" => Ok(Self::Direct),
            "custom" | "latency" | "latency_probed" => Ok(Self::LatencyProbed),
            "random" => Ok(Self::Random),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}
