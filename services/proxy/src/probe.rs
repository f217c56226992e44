//! Latency probing for backend selection.
//!
//! - Fixed echo count per candidate (5 by default)
//! - Each echo bounded by a timeout (2s by default)
//! - A candidate's latency is the mean over every echo, a lost echo counting
//!   as the full timeout
//! - A candidate with no successful echo is reported as failed

use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlrelay_cluster::Endpoint;
use thiserror::Error;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

/// Default number of echoes per probe.
pub const DEFAULT_PROBE_COUNT: u32 = 5;

/// Default timeout for a single echo.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe errors. A failed probe excludes the candidate from comparison.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Host name did not resolve.
    #[error("could not resolve {0}")]
    Unresolvable(String),

    /// No echo came back.
    #[error("no echo from {addr} after {attempts} attempts ({timeout:?} each)")]
    NoEcho {
        addr: String,
        attempts: u32,
        timeout: Duration,
    },
}

/// Measures round-trip latency to an endpoint.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Mean round-trip time to `target`.
    async fn probe(&self, target: &Endpoint) -> Result<Duration, ProbeError>;
}

/// Prober timing TCP handshakes.
///
/// A handshake answers the same question as an ICMP echo (is the host up,
/// how far away is it) without needing raw-socket privileges. A refused
/// connection still counts: the host answered.
#[derive(Debug, Clone)]
pub struct TcpProber {
    count: u32,
    timeout: Duration,
}

impl TcpProber {
    pub fn with_settings(count: u32, timeout: Duration) -> Self {
        Self {
            count: count.max(1),
            timeout,
        }
    }

    async fn echo(&self, addr: std::net::SocketAddr) -> io::Result<Duration> {
        let started = Instant::now();
        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(started.elapsed()),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(started.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "echo timeout")),
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, target: &Endpoint) -> Result<Duration, ProbeError> {
        let addr = target.address();
        let resolved = match timeout(self.timeout, lookup_host(addr.as_str())).await {
            Ok(Ok(mut addrs)) => addrs.next(),
            _ => None,
        }
        .ok_or_else(|| ProbeError::Unresolvable(addr.clone()))?;

        let mut echoes = Vec::with_capacity(self.count as usize);
        for attempt in 0..self.count {
            match self.echo(resolved).await {
                Ok(rtt) => echoes.push(Some(rtt)),
                Err(e) => {
                    debug!(target = %addr, attempt, error = %e, "Echo failed");
                    echoes.push(None);
                }
            }
        }

        let Some(mean) = mean_rtt(&echoes, self.timeout) else {
            return Err(ProbeError::NoEcho {
                addr,
                attempts: self.count,
                timeout: self.timeout,
            });
        };

        debug!(
            target = %addr,
            mean_ms = mean.as_secs_f64() * 1000.0,
            answered = echoes.iter().flatten().count(),
            "Probe complete"
        );
        Ok(mean)
    }
}

/// Mean round trip with lost echoes (`None`) charged at `timeout`.
/// `None` when no echo answered.
fn mean_rtt(echoes: &[Option<Duration>], timeout: Duration) -> Option<Duration> {
    if echoes.iter().all(Option::is_none) {
        return None;
    }
    let total: Duration = echoes.iter().map(|echo| echo.unwrap_or(timeout)).sum();
    Some(total / echoes.len() as u32)
}
