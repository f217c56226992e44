//! Application state shared across request handlers.

use std::sync::Arc;

use sqlrelay_cluster::RoutingStrategy;

use crate::db::{FetchMode, QueryExecutor};
use crate::selector::BackendSelector;
use crate::tunnel::TunnelReport;

/// Names of the tunnels that came up at startup and those that did not.
#[derive(Debug, Clone, Default)]
pub struct TunnelStatus {
    pub established: Vec<String>,
    pub failed: Vec<String>,
}

impl TunnelStatus {
    pub fn from_report(report: &TunnelReport) -> Self {
        let mut established: Vec<String> = report.aliases.keys().cloned().collect();
        established.sort();
        Self {
            established,
            failed: report.failed_replicas(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    selector: BackendSelector,
    executor: Arc<dyn QueryExecutor>,
    fetch_mode: FetchMode,
    default_strategy: RoutingStrategy,
    tunnels: TunnelStatus,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        selector: BackendSelector,
        executor: Arc<dyn QueryExecutor>,
        fetch_mode: FetchMode,
        default_strategy: RoutingStrategy,
        tunnels: TunnelStatus,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                selector,
                executor,
                fetch_mode,
                default_strategy,
                tunnels,
            }),
        }
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.inner.selector
    }

    pub fn executor(&self) -> &dyn QueryExecutor {
        self.inner.executor.as_ref()
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.inner.fetch_mode
    }

    /// Strategy used by the generic `query` route.
    pub fn default_strategy(&self) -> RoutingStrategy {
        self.inner.default_strategy
    }

    pub fn tunnels(&self) -> &TunnelStatus {
        &self.inner.tunnels
    }
}
