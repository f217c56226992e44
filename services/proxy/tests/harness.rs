//! Test harness for proxy integration tests.
//!
//! Provides an echo backend standing in for a database behind a tunnel, a
//! recording query executor, and helpers to build proxy state.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use sqlrelay_cluster::{ClusterTopology, Endpoint, RoutingStrategy};
use sqlrelay_proxy::db::{DbError, FetchMode, QueryExecutor, QueryResult};
use sqlrelay_proxy::probe::{ProbeError, Prober};
use sqlrelay_proxy::selector::BackendSelector;
use sqlrelay_proxy::state::{AppState, TunnelStatus};
use sqlrelay_proxy::tunnel::TunnelAliases;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Reserve an ephemeral port and release it.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Database stand-in behind a tunnel: echoes every byte back and counts
/// accepted connections.
pub struct EchoBackend {
    pub addr: SocketAddr,
    accepted: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl EchoBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    let (mut reader, mut writer) = stream.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });

        Ok(Self {
            addr,
            accepted,
            task,
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

impl Drop for EchoBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Executor answering from memory and recording every call.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<(Endpoint, String)>>,
    pub fail: bool,
}

impl RecordingExecutor {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(Endpoint, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        sql: &str,
        _mode: FetchMode,
    ) -> Result<QueryResult, DbError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.clone(), sql.to_string()));

        if self.fail {
            return Err(DbError::QueryTimeout {
                endpoint: endpoint.to_string(),
                timeout: Duration::from_millis(1),
            });
        }

        let mut result = QueryResult::new(vec!["film_id".to_string(), "title".to_string()]);
        result.add_row(vec![json!(1), json!("ACADEMY DINOSAUR")]);
        Ok(result)
    }
}

/// Prober answering from a fixed table; unknown endpoints fail.
pub struct TableProber(pub HashMap<String, Duration>);

#[async_trait]
impl Prober for TableProber {
    async fn probe(&self, target: &Endpoint) -> Result<Duration, ProbeError> {
        self.0
            .get(&target.name)
            .copied()
            .ok_or_else(|| ProbeError::Unresolvable(target.address()))
    }
}

pub const TOPOLOGY: &str = r#"{
    "master": { "name": "MASTER", "host": "10.0.0.1", "port": 3306 },
    "replicas": [
        { "name": "SLAVE_1", "host": "10.0.0.2", "port": 3306 },
        { "name": "SLAVE_2", "host": "10.0.0.3", "port": 3306 }
    ]
}"#;

/// Proxy state over [`TOPOLOGY`] with in-memory executor and prober.
pub fn proxy_state(
    executor: Arc<RecordingExecutor>,
    latencies: &[(&str, u64)],
    tunnels: TunnelStatus,
) -> AppState {
    let topology = ClusterTopology::from_json(TOPOLOGY).unwrap();
    let prober = TableProber(
        latencies
            .iter()
            .map(|(name, ms)| (name.to_string(), Duration::from_millis(*ms)))
            .collect(),
    );
    let selector = BackendSelector::with_rng(
        &topology,
        &TunnelAliases::new(),
        Arc::new(prober),
        StdRng::seed_from_u64(7),
    );

    AppState::new(
        selector,
        executor,
        FetchMode::All,
        RoutingStrategy::Direct,
        tunnels,
    )
}
