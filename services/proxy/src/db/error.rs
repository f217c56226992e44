//! Database error types.

use std::time::Duration;

use thiserror::Error;

/// Query execution errors. Every variant surfaces as a 500; nothing is retried.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the chosen backend.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: sqlx::Error,
    },

    /// Backend did not accept the connection in time.
    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// Statement was rejected or failed on the backend.
    #[error("query failed on {endpoint}: {source}")]
    Query {
        endpoint: String,
        #[source]
        source: sqlx::Error,
    },

    /// Statement did not complete in time.
    #[error("query on {endpoint} timed out after {timeout:?}")]
    QueryTimeout { endpoint: String, timeout: Duration },
}

impl DbError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } | Self::ConnectTimeout { .. } => "backend_unreachable",
            Self::Query { .. } | Self::QueryTimeout { .. } => "database_error",
        }
    }
}
