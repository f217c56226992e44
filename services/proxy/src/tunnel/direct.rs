//! Transport that connects straight to the remote target.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlrelay_cluster::Endpoint;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{BoxedStream, TunnelError, TunnelRoute, TunnelSession, TunnelTransport};

/// Default connect timeout for channel connections.
pub const DEFAULT_CHANNEL_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Plain TCP forwarding to `remote_host:remote_port`, without a bastion.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    connect_timeout: Duration,
}

impl DirectTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CHANNEL_CONNECT_TIMEOUT,
        }
    }
}

impl Default for DirectTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelTransport for DirectTransport {
    async fn connect(&self, route: &TunnelRoute) -> Result<Arc<dyn TunnelSession>, TunnelError> {
        Ok(Arc::new(DirectSession {
            remote: route.remote.clone(),
            connect_timeout: self.connect_timeout,
        }))
    }
}

struct DirectSession {
    remote: Endpoint,
    connect_timeout: Duration,
}

#[async_trait]
impl TunnelSession for DirectSession {
    async fn open_channel(&self, originator: SocketAddr) -> Result<BoxedStream, TunnelError> {
        let target = self.remote.address();
        debug!(originator = %originator, target = %target, "Opening direct channel");

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TunnelError::Channel {
                    target,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TunnelError::Channel {
                    target,
                    reason: "connect timeout".to_string(),
                })
            }
        };

        Ok(Box::new(stream))
    }

    async fn close(&self) {}
}
