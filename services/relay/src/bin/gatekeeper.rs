//! sqlrelay Gatekeeper
//!
//! Public entry point. Forwards every request to the trusted host without
//! looking at it.

use anyhow::{Context, Result};
use sqlrelay_relay::{config::Config, gatekeeper_router, server, Relay, Stage, ValidationPolicy};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env("0.0.0.0:8080")?;
    server::init_tracing(&config.log_level);

    info!("Starting sqlrelay gatekeeper");
    info!(
        listen_addr = %config.listen_addr,
        downstream = %config.downstream_url,
        "Configuration loaded"
    );

    let relay = Relay::new(
        Stage::Gatekeeper,
        config.relay_settings(),
        ValidationPolicy::default(),
    )
    .context("failed to create relay")?;

    server::serve(config.listen_addr, gatekeeper_router(relay)).await?;

    info!("Gatekeeper shutdown complete");
    Ok(())
}
