//! sqlrelay relay stages.
//!
//! Both relays share one state machine: receive, optionally validate,
//! forward, relay the response. The gatekeeper never validates; the trusted
//! host always does.

pub mod config;
pub mod error;
mod forward;
mod health;
pub mod routes;
pub mod server;

pub use error::RelayError;
pub use forward::{Relay, RelaySettings, Stage, ValidationPolicy};
pub use routes::{gatekeeper_router, trusted_host_router};
