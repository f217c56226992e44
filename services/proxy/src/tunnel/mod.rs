//! Tunnels exposing remote database ports as local ports.
//!
//! This module provides:
//! - The [`TunnelTransport`] seam between the manager and the wire
//! - An SSH transport (`direct-tcpip` channels through a bastion)
//! - A direct transport for setups without a bastion
//! - The [`TunnelManager`] that owns every live tunnel
//!
//! ## Architecture
//!
//! ```text
//! 127.0.0.1:local_port -> Forwarder task -> Session channel -> Bastion -> remote_host:remote_port
//! ```
//!
//! Tunnels are established once, before the proxy accepts requests, and torn
//! down once at shutdown.

mod direct;
mod manager;
mod ssh;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlrelay_cluster::{Endpoint, Replica, TunnelSpec};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

pub use direct::DirectTransport;
pub use manager::{TunnelAliases, TunnelFailure, TunnelManager, TunnelReport};
pub use ssh::{BastionCredentials, SshTransport};

/// Default time allowed to bring a session up.
pub const DEFAULT_TUNNEL_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunnel errors.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Private key could not be loaded or decoded.
    #[error("failed to load private key: {0}")]
    Key(String),

    /// Bastion refused or dropped the connection.
    #[error("failed to connect to bastion {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// Bastion did not answer in time.
    #[error("bastion {addr} did not respond within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    /// Bastion rejected the credentials.
    #[error("authentication to {addr} as {user} rejected")]
    AuthRejected { addr: String, user: String },

    /// Local alias port could not be bound.
    #[error("failed to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Forwarding channel could not be opened.
    #[error("failed to open channel to {target}: {reason}")]
    Channel { target: String, reason: String },
}

/// Byte stream carried by a tunnel channel.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// Boxed channel stream.
pub type BoxedStream = Box<dyn DuplexStream>;

/// Wiring of one tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRoute {
    /// Replica this tunnel serves.
    pub replica: String,
    /// Host the session is opened against.
    pub bastion: Endpoint,
    /// Loopback port the tunnel listens on.
    pub local_port: u16,
    /// Where the bastion forwards to.
    pub remote: Endpoint,
}

impl TunnelRoute {
    /// Route for a tunneled replica: the replica host acts as bastion.
    pub fn for_replica(replica: &Replica, spec: &TunnelSpec) -> Self {
        Self {
            replica: replica.name.clone(),
            bastion: Endpoint::new(replica.name.clone(), replica.host.clone(), spec.ssh_port),
            local_port: spec.local_port,
            remote: Endpoint::new(
                replica.name.clone(),
                spec.remote_host.clone(),
                spec.remote_port,
            ),
        }
    }
}

/// Opens sessions for tunnel routes.
#[async_trait]
pub trait TunnelTransport: Send + Sync {
    /// Bring up the session backing `route`.
    async fn connect(&self, route: &TunnelRoute) -> Result<Arc<dyn TunnelSession>, TunnelError>;
}

/// A live session able to open forwarding channels to its route's remote.
#[async_trait]
pub trait TunnelSession: Send + Sync {
    /// Open one channel for a local connection coming from `originator`.
    async fn open_channel(&self, originator: SocketAddr) -> Result<BoxedStream, TunnelError>;

    /// Close the session. Called once at teardown.
    async fn close(&self);
}
