//! Tunnel lifecycle: bulk establishment at startup, bulk teardown at shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use sqlrelay_cluster::{ClusterTopology, Endpoint, LOCAL_ALIAS_HOST};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

use super::{
    TunnelError, TunnelRoute, TunnelSession, TunnelTransport, DEFAULT_TUNNEL_CONNECT_TIMEOUT,
};

/// Replica name to the local endpoint its tunnel exposes.
pub type TunnelAliases = HashMap<String, Endpoint>;

/// A replica whose tunnel could not be established.
#[derive(Debug)]
pub struct TunnelFailure {
    pub replica: String,
    pub error: TunnelError,
}

/// Result of establishing every tunnel in a topology.
#[derive(Debug, Default)]
pub struct TunnelReport {
    /// Tunnels that are live.
    pub aliases: TunnelAliases,
    /// Tunnels that failed.
    pub failed: Vec<TunnelFailure>,
}

impl TunnelReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_replicas(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.replica.clone()).collect()
    }
}

/// A live tunnel. Owned exclusively by the manager.
struct TunnelHandle {
    route: TunnelRoute,
    local_addr: SocketAddr,
    session: Arc<dyn TunnelSession>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(replica = %self.route.replica, error = %e, "Tunnel forwarder task failed");
        }
        self.session.close().await;
        info!(
            replica = %self.route.replica,
            local_addr = %self.local_addr,
            "Tunnel closed"
        );
    }
}

/// Owns every tunnel of the process.
pub struct TunnelManager {
    transport: Arc<dyn TunnelTransport>,
    connect_timeout: Duration,
    handles: Mutex<Vec<TunnelHandle>>,
}

impl TunnelManager {
    /// Create a manager with the default connect timeout.
    pub fn new(transport: Arc<dyn TunnelTransport>) -> Self {
        Self::with_timeout(transport, DEFAULT_TUNNEL_CONNECT_TIMEOUT)
    }

    /// Create a manager with a custom connect timeout.
    pub fn with_timeout(transport: Arc<dyn TunnelTransport>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            connect_timeout,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Establish a tunnel for every tunneled replica.
    ///
    /// A failing replica is reported and skipped; it never aborts the others.
    pub async fn establish_all(&self, topology: &ClusterTopology) -> TunnelReport {
        let routes: Vec<TunnelRoute> = topology
            .tunneled_replicas()
            .map(|(replica, spec)| TunnelRoute::for_replica(replica, spec))
            .collect();

        let outcomes = join_all(routes.into_iter().map(|route| async move {
            let result = self.establish(&route).await;
            (route, result)
        }))
        .await;

        let mut report = TunnelReport::default();
        let mut established = Vec::new();

        for (route, result) in outcomes {
            match result {
                Ok(handle) => {
                    info!(
                        replica = %route.replica,
                        local_addr = %handle.local_addr,
                        bastion = %route.bastion,
                        remote = %route.remote,
                        "Tunnel established"
                    );
                    report.aliases.insert(
                        route.replica.clone(),
                        Endpoint::local_alias(route.replica.clone(), handle.local_addr.port()),
                    );
                    established.push(handle);
                }
                Err(e) => {
                    error!(
                        replica = %route.replica,
                        bastion = %route.bastion,
                        error = %e,
                        "Failed to establish tunnel"
                    );
                    report.failed.push(TunnelFailure {
                        replica: route.replica,
                        error: e,
                    });
                }
            }
        }

        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(established);

        report
    }

    /// Close every tunnel. Safe to call more than once.
    pub async fn teardown_all(&self) {
        let handles = {
            let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        if handles.is_empty() {
            debug!("No tunnels to tear down");
            return;
        }

        info!(count = handles.len(), "Tearing down tunnels");
        join_all(handles.into_iter().map(TunnelHandle::shutdown)).await;
    }

    /// Number of live tunnels.
    pub fn active_count(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn establish(&self, route: &TunnelRoute) -> Result<TunnelHandle, TunnelError> {
        let session = match timeout(self.connect_timeout, self.transport.connect(route)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TunnelError::Timeout {
                    addr: route.bastion.address(),
                    timeout: self.connect_timeout,
                })
            }
        };

        let listener = match TcpListener::bind((LOCAL_ALIAS_HOST, route.local_port)).await {
            Ok(listener) => listener,
            Err(source) => {
                session.close().await;
                return Err(TunnelError::Bind {
                    port: route.local_port,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr().map_err(|source| TunnelError::Bind {
            port: route.local_port,
            source,
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(
            run_forwarder(listener, Arc::clone(&session), shutdown_rx)
                .instrument(tracing::info_span!("tunnel", replica = %route.replica)),
        );

        Ok(TunnelHandle {
            route: route.clone(),
            local_addr,
            session,
            shutdown_tx,
            task,
        })
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        let handles = self
            .handles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for handle in handles.iter() {
            handle.task.abort();
        }
    }
}

/// Accept local connections and pipe each through its own channel.
///
/// Exits on shutdown; in-flight connections are aborted with it.
async fn run_forwarder(
    listener: TcpListener,
    session: Arc<dyn TunnelSession>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let session = Arc::clone(&session);
                    connections.spawn(async move {
                        if let Err(e) = pipe(stream, peer_addr, session).await {
                            debug!(peer_addr = %peer_addr, error = %e, "Tunnel connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Tunnel accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    connections.shutdown().await;
    debug!("Tunnel forwarder stopped");
}

async fn pipe(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    session: Arc<dyn TunnelSession>,
) -> Result<(), TunnelError> {
    let mut channel = session.open_channel(peer_addr).await?;
    let (sent, received) = tokio::io::copy_bidirectional(&mut stream, &mut channel)
        .await
        .map_err(|e| TunnelError::Channel {
            target: peer_addr.to_string(),
            reason: e.to_string(),
        })?;

    debug!(peer_addr = %peer_addr, sent, received, "Tunnel connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::DirectTransport;
    use sqlrelay_cluster::{Replica, TunnelSpec};

    fn tunneled(name: &str, local_port: u16, remote_port: u16) -> Replica {
        Replica {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            tunnel: Some(TunnelSpec {
                local_port,
                ssh_port: 22,
                remote_host: "127.0.0.1".to_string(),
                remote_port,
            }),
        }
    }

    #[tokio::test]
    async fn test_untunneled_topology_establishes_nothing() {
        let topology = ClusterTopology::new(
            Endpoint::new("MASTER", "127.0.0.1", 3306),
            vec![Replica {
                name: "SLAVE_1".to_string(),
                host: "10.0.0.2".to_string(),
                port: 3306,
                tunnel: None,
            }],
        )
        .unwrap();

        let manager = TunnelManager::new(Arc::new(DirectTransport::new()));
        let report = manager.establish_all(&topology).await;
        assert!(report.is_complete());
        assert!(report.aliases.is_empty());
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let topology = ClusterTopology::new(
            Endpoint::new("MASTER", "127.0.0.1", 3306),
            vec![tunneled("SLAVE_1", port, 3306)],
        )
        .unwrap();

        let manager = TunnelManager::new(Arc::new(DirectTransport::new()));
        let report = manager.establish_all(&topology).await;
        assert_eq!(report.aliases["SLAVE_1"].port, port);
        assert_eq!(manager.active_count(), 1);

        manager.teardown_all().await;
        manager.teardown_all().await;
        assert_eq!(manager.active_count(), 0);

        // Listener is gone, so the port can be bound again.
        TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    }
}
