use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use sqlrelay_cluster::{ClusterTopology, RoutingStrategy};

use crate::db::{DbConfig, FetchMode};
use crate::probe::{DEFAULT_PROBE_COUNT, DEFAULT_PROBE_TIMEOUT};
use crate::tunnel::{BastionCredentials, DEFAULT_TUNNEL_CONNECT_TIMEOUT};

/// How tunnels reach their remote target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelTransportKind {
    /// SSH local forwarding through the replica's bastion.
    Ssh,
    /// Plain TCP to the remote target, no bastion.
    Direct,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub topology: ClusterTopology,
    pub database: DbConfig,
    pub fetch_mode: FetchMode,
    pub default_strategy: RoutingStrategy,
    pub probe_count: u32,
    pub probe_timeout: Duration,
    pub tunnel_transport: TunnelTransportKind,
    pub tunnel_connect_timeout: Duration,
    pub bastion: BastionCredentials,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("SQLRELAY_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string())
            .parse()
            .context("invalid SQLRELAY_LISTEN_ADDR")?;

        let log_level = std::env::var("SQLRELAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let topology = load_topology()?;

        let database = DbConfig::from_env()?;

        let fetch_mode = match std::env::var("SQLRELAY_FETCH") {
            Ok(value) => value
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("invalid SQLRELAY_FETCH")?,
            Err(_) => FetchMode::default(),
        };

        let default_strategy = match std::env::var("SQLRELAY_DEFAULT_STRATEGY") {
            Ok(value) => value.parse().context("invalid SQLRELAY_DEFAULT_STRATEGY")?,
            Err(_) => RoutingStrategy::Direct,
        };

        let probe_count = env_parse("SQLRELAY_PROBE_COUNT")?.unwrap_or(DEFAULT_PROBE_COUNT);
        let probe_timeout = env_millis("SQLRELAY_PROBE_TIMEOUT_MS")?.unwrap_or(DEFAULT_PROBE_TIMEOUT);

        let tunnel_transport = match std::env::var("SQLRELAY_TUNNEL_TRANSPORT")
            .unwrap_or_else(|_| "ssh".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "ssh" => TunnelTransportKind::Ssh,
            "direct" => TunnelTransportKind::Direct,
            other => bail!("invalid SQLRELAY_TUNNEL_TRANSPORT: {other} (expected ssh or direct)"),
        };

        let tunnel_connect_timeout = env_millis("SQLRELAY_TUNNEL_CONNECT_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_TUNNEL_CONNECT_TIMEOUT);

        let bastion = BastionCredentials {
            username: std::env::var("SQLRELAY_SSH_USER").unwrap_or_else(|_| "ubuntu".to_string()),
            private_key_path: std::env::var("SQLRELAY_SSH_KEY_FILE").ok().map(PathBuf::from),
            private_key: std::env::var("SQLRELAY_SSH_KEY").ok(),
            passphrase: std::env::var("SQLRELAY_SSH_KEY_PASSPHRASE").ok(),
            strict_host_keys: std::env::var("SQLRELAY_SSH_STRICT_HOST_KEYS")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        };

        Ok(Self {
            listen_addr,
            log_level,
            topology,
            database,
            fetch_mode,
            default_strategy,
            probe_count,
            probe_timeout,
            tunnel_transport,
            tunnel_connect_timeout,
            bastion,
        })
    }
}

fn load_topology() -> Result<ClusterTopology> {
    if let Ok(document) = std::env::var("SQLRELAY_TOPOLOGY") {
        return ClusterTopology::from_json(&document).context("invalid SQLRELAY_TOPOLOGY");
    }

    let path = std::env::var("SQLRELAY_TOPOLOGY_FILE")
        .context("either SQLRELAY_TOPOLOGY or SQLRELAY_TOPOLOGY_FILE must be set")?;
    ClusterTopology::from_file(&path).with_context(|| format!("failed to load topology from {path}"))
}

pub(crate) fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {key}")),
        Err(_) => Ok(None),
    }
}

pub(crate) fn env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}
