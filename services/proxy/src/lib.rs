//! sqlrelay proxy library.
//!
//! This crate primarily ships a `proxy` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod config;
pub mod db;
pub mod probe;
pub mod selector;
pub mod state;
pub mod tunnel;
