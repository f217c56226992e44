//! sqlrelay Trusted Host
//!
//! Internal hop between the gatekeeper and the proxy. The only stage that
//! validates requests.

use anyhow::{Context, Result};
use sqlrelay_relay::{config::Config, server, trusted_host_router, Relay, Stage};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env("0.0.0.0:8081")?;
    server::init_tracing(&config.log_level);

    info!("Starting sqlrelay trusted host");
    info!(
        listen_addr = %config.listen_addr,
        downstream = %config.downstream_url,
        read_only = config.read_only,
        read_only_routes = ?config.read_only_routes,
        default_strategy = %config.default_strategy,
        "Configuration loaded"
    );

    let relay = Relay::new(
        Stage::TrustedHost,
        config.relay_settings(),
        config.validation_policy(),
    )
    .context("failed to create relay")?;

    server::serve(config.listen_addr, trusted_host_router(relay)).await?;

    info!("Trusted host shutdown complete");
    Ok(())
}
