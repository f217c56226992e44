//! sqlrelay Proxy
//!
//! Last stage of the pipeline. Brings up the replica tunnels, then serves
//! the query routes: each request picks a backend by routing strategy and
//! runs its statement there.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlrelay_proxy::{
    api,
    config::{self, TunnelTransportKind},
    db::MySqlExecutor,
    probe::TcpProber,
    selector::BackendSelector,
    state::{AppState, TunnelStatus},
    tunnel::{DirectTransport, SshTransport, TunnelManager, TunnelTransport},
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SQLRELAY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting sqlrelay proxy");
    info!(
        listen_addr = %config.listen_addr,
        master = %config.topology.master,
        replicas = config.topology.replicas.len(),
        default_strategy = %config.default_strategy,
        "Configuration loaded"
    );

    // Bring tunnels up before accepting any request
    let transport: Arc<dyn TunnelTransport> = match config.tunnel_transport {
        TunnelTransportKind::Ssh => Arc::new(
            SshTransport::new(&config.bastion).context("failed to prepare SSH transport")?,
        ),
        TunnelTransportKind::Direct => Arc::new(DirectTransport::new()),
    };
    let tunnels = TunnelManager::with_timeout(transport, config.tunnel_connect_timeout);

    let report = tunnels.establish_all(&config.topology).await;
    if report.is_complete() {
        info!(established = report.aliases.len(), "Tunnels ready");
    } else {
        warn!(
            established = report.aliases.len(),
            failed = ?report.failed_replicas(),
            "Some tunnels failed; those replicas are out of rotation"
        );
    }

    // Create application state
    let prober = Arc::new(TcpProber::with_settings(
        config.probe_count,
        config.probe_timeout,
    ));
    let selector = BackendSelector::new(&config.topology, &report.aliases, prober);
    let executor = Arc::new(MySqlExecutor::new(config.database.clone()));
    let state = AppState::new(
        selector,
        executor,
        config.fetch_mode,
        config.default_strategy,
        TunnelStatus::from_report(&report),
    );

    // Build and run the server
    let app = api::create_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen_addr, error = %e, "Failed to bind listener");
            tunnels.teardown_all().await;
            return Err(e.into());
        }
    };
    info!(addr = %config.listen_addr, "Listening for connections");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await;

    if let Err(e) = &served {
        error!(error = %e, "Server error");
    }

    // Tunnels outlive the HTTP server
    tunnels.teardown_all().await;

    info!("Proxy shutdown complete");
    served.map_err(Into::into)
}
