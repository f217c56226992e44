//! End-to-end pipeline tests.
//!
//! Each test runs the full chain in-process on ephemeral ports:
//!
//! ```text
//! client -> gatekeeper -> trusted host -> proxy -> backend
//! ```
//!
//! 1. A valid `GET` reaches the proxy and names the serving backend
//! 2. A `DROP TABLE` body is refused at the trusted host and never reaches the proxy
//! 3. An unreachable backend yields a 500 that travels back up the chain unchanged
//!
//! ## Running
//!
//! ```bash
//! cargo test -p sqlrelay-e2e --test pipeline
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use sqlrelay_cluster::{ClusterTopology, Endpoint, RoutingStrategy};
use sqlrelay_proxy::{
    api::{create_router, BACKEND_HEADER},
    db::{DbConfig, DbError, FetchMode, MySqlExecutor, QueryExecutor, QueryResult},
    probe::TcpProber,
    selector::BackendSelector,
    state::{AppState, TunnelStatus},
    tunnel::TunnelAliases,
};
use sqlrelay_relay::{
    gatekeeper_router, trusted_host_router, Relay, RelaySettings, Stage, ValidationPolicy,
};
use tokio::net::TcpListener;
use tracing::info;

/// Executor serving a fixed film list and counting calls.
#[derive(Default)]
struct FilmExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl QueryExecutor for FilmExecutor {
    async fn execute(
        &self,
        _endpoint: &Endpoint,
        _sql: &str,
        _mode: FetchMode,
    ) -> Result<QueryResult, DbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut result = QueryResult::new(vec!["film_id".to_string(), "title".to_string()]);
        for (id, title) in [(1, "ACADEMY DINOSAUR"), (2, "ACE GOLDFINGER")] {
            result.add_row(vec![json!(id), json!(title)]);
        }
        Ok(result)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("info")
        .try_init();
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn proxy_state(master: Endpoint, executor: Arc<dyn QueryExecutor>) -> AppState {
    let topology = ClusterTopology::new(master, Vec::new()).unwrap();
    let selector = BackendSelector::with_rng(
        &topology,
        &TunnelAliases::new(),
        Arc::new(TcpProber::with_settings(1, Duration::from_millis(200))),
        StdRng::seed_from_u64(1),
    );
    AppState::new(
        selector,
        executor,
        FetchMode::All,
        RoutingStrategy::Direct,
        TunnelStatus::default(),
    )
}

fn relay(stage: Stage, downstream: SocketAddr, policy: ValidationPolicy) -> Relay {
    Relay::new(
        stage,
        RelaySettings {
            downstream_url: format!("http://{downstream}"),
            timeout: Duration::from_secs(10),
            max_body_bytes: 64 * 1024,
        },
        policy,
    )
    .unwrap()
}

/// Start trusted host and gatekeeper in front of a proxy; returns the gatekeeper.
async fn spawn_chain(proxy: SocketAddr) -> SocketAddr {
    let trusted = spawn(trusted_host_router(relay(
        Stage::TrustedHost,
        proxy,
        ValidationPolicy::default(),
    )))
    .await;
    spawn(gatekeeper_router(relay(
        Stage::Gatekeeper,
        trusted,
        ValidationPolicy::default(),
    )))
    .await
}

#[tokio::test]
async fn select_travels_the_whole_chain() {
    init_tracing();

    let executor = Arc::new(FilmExecutor::default());
    let proxy = spawn(create_router(proxy_state(
        Endpoint::new("MASTER", "10.0.0.1", 3306),
        executor.clone(),
    )))
    .await;
    let gatekeeper = spawn_chain(proxy).await;

    info!(%gatekeeper, %proxy, "Chain up");

    let response = reqwest::Client::new()
        .get(format!("http://{gatekeeper}/normal"))
        .query(&[("query", "SELECT * FROM film LIMIT 5")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[BACKEND_HEADER], "MASTER");

    let body = response.text().await.unwrap();
    assert!(body.contains("Received from 10.0.0.1:3306 (MASTER)"), "{body}");
    assert!(body.contains("ACE GOLDFINGER"), "{body}");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn drop_table_stops_at_trusted_host() {
    init_tracing();

    let executor = Arc::new(FilmExecutor::default());
    let proxy = spawn(create_router(proxy_state(
        Endpoint::new("MASTER", "10.0.0.1", 3306),
        executor.clone(),
    )))
    .await;
    let gatekeeper = spawn_chain(proxy).await;

    let response = reqwest::Client::new()
        .post(format!("http://{gatekeeper}/normal"))
        .json(&json!({ "query": "DROP TABLE film" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let problem: serde_json::Value = response.json().await.unwrap();
    assert_eq!(problem["title"], "Invalid Request");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_backend_propagates_500() {
    init_tracing();

    let dead_port = unused_port().await;
    let executor = Arc::new(MySqlExecutor::new(DbConfig {
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }));
    let proxy = spawn(create_router(proxy_state(
        Endpoint::new("MASTER", "127.0.0.1", dead_port),
        executor,
    )))
    .await;
    let gatekeeper = spawn_chain(proxy).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gatekeeper}/normal"))
        .query(&[("query", "SELECT * FROM film LIMIT 5")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);

    // The body is the proxy's own problem document, relayed untouched.
    let problem: serde_json::Value = response.json().await.unwrap();
    assert_eq!(problem["code"], "backend_unreachable");
    assert_eq!(problem["backend"], "MASTER");
}
