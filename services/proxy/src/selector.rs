//! Backend selection.
//!
//! Picks the endpoint that executes a query:
//! - `Direct`: always the master
//! - `LatencyProbed`: probe every candidate, strictly lowest mean wins,
//!   ties go to the earlier candidate (master first, then replicas in order)
//! - `Random`: uniform choice among replicas, master when there are none
//!
//! Replicas resolve to their tunnel alias when they have one. A tunneled
//! replica without a live tunnel is not a candidate.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use sqlrelay_cluster::{ClusterTopology, Endpoint, Replica, RoutingStrategy};
use tracing::{debug, warn};

use crate::probe::Prober;
use crate::tunnel::TunnelAliases;

/// A backend able to serve queries.
#[derive(Debug, Clone)]
struct Candidate {
    /// Where queries are sent.
    endpoint: Endpoint,
    /// Where latency is measured.
    probe: Endpoint,
}

/// Selects backends for a fixed topology.
pub struct BackendSelector {
    master: Candidate,
    replicas: Vec<Candidate>,
    prober: Arc<dyn Prober>,
    rng: Mutex<StdRng>,
}

impl BackendSelector {
    /// Create a selector with an OS-seeded random source.
    pub fn new(
        topology: &ClusterTopology,
        aliases: &TunnelAliases,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self::with_rng(topology, aliases, prober, StdRng::from_os_rng())
    }

    /// Create a selector with a caller-provided random source.
    pub fn with_rng(
        topology: &ClusterTopology,
        aliases: &TunnelAliases,
        prober: Arc<dyn Prober>,
        rng: StdRng,
    ) -> Self {
        let master = Candidate {
            endpoint: topology.master.clone(),
            probe: topology.master.clone(),
        };

        let replicas = topology
            .replicas
            .iter()
            .filter_map(|replica| match resolve(replica, aliases) {
                Some(endpoint) => Some(Candidate {
                    endpoint,
                    probe: replica.probe_endpoint(),
                }),
                None => {
                    warn!(replica = %replica.name, "Replica has no live tunnel, excluded");
                    None
                }
            })
            .collect();

        Self {
            master,
            replicas,
            prober,
            rng: Mutex::new(rng),
        }
    }

    /// Replica endpoints that can be selected, in topology order.
    pub fn replicas(&self) -> Vec<Endpoint> {
        self.replicas.iter().map(|c| c.endpoint.clone()).collect()
    }

    /// Pick the backend for one request.
    pub async fn select(&self, strategy: RoutingStrategy) -> Endpoint {
        let endpoint = match strategy {
            RoutingStrategy::Direct => self.master.endpoint.clone(),
            RoutingStrategy::LatencyProbed => self.lowest_latency().await,
            RoutingStrategy::Random => self.random_replica(),
        };

        debug!(strategy = %strategy, backend = %endpoint, name = %endpoint.name, "Backend selected");
        endpoint
    }

    fn random_replica(&self) -> Endpoint {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.replicas
            .choose(&mut *rng)
            .map(|c| c.endpoint.clone())
            .unwrap_or_else(|| self.master.endpoint.clone())
    }

    async fn lowest_latency(&self) -> Endpoint {
        let candidates: Vec<&Candidate> = std::iter::once(&self.master)
            .chain(self.replicas.iter())
            .collect();

        let results = join_all(candidates.iter().map(|c| self.prober.probe(&c.probe))).await;

        let samples: Vec<Option<Duration>> = results
            .into_iter()
            .zip(&candidates)
            .map(|(result, candidate)| match result {
                Ok(rtt) => {
                    debug!(
                        candidate = %candidate.endpoint.name,
                        probe = %candidate.probe,
                        mean_ms = rtt.as_secs_f64() * 1000.0,
                        "Probe result"
                    );
                    Some(rtt)
                }
                Err(e) => {
                    warn!(
                        candidate = %candidate.endpoint.name,
                        probe = %candidate.probe,
                        error = %e,
                        "Probe failed, candidate excluded"
                    );
                    None
                }
            })
            .collect();

        match fastest(&samples) {
            Some(index) => candidates[index].endpoint.clone(),
            None => {
                warn!("Every probe failed, falling back to master");
                self.master.endpoint.clone()
            }
        }
    }
}

/// Resolve a replica to the endpoint queries should use.
///
/// Untunneled replicas are used as-is; tunneled ones need a live alias.
fn resolve(replica: &Replica, aliases: &TunnelAliases) -> Option<Endpoint> {
    if !replica.is_tunneled() {
        return Some(replica.direct_endpoint());
    }
    aliases
        .get(&replica.name)
        .map(|alias| Endpoint::new(replica.name.clone(), alias.host.clone(), alias.port))
}

/// Index of the strictly lowest sample; the first one wins ties.
/// Missing samples never win.
pub fn fastest(samples: &[Option<Duration>]) -> Option<usize> {
    let mut best: Option<(usize, Duration)> = None;
    for (index, sample) in samples.iter().enumerate() {
        let Some(rtt) = *sample else { continue };
        if best.is_none_or(|(_, current)| rtt < current) {
            best = Some((index, rtt));
        }
    }
    best.map(|(index, _)| index)
}
