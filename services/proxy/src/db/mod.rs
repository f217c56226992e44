//! Query execution against the selected backend.
//!
//! This module provides:
//! - The [`QueryExecutor`] seam used by the HTTP handlers
//! - A MySQL executor opening one scoped connection per request
//! - Row rendering into JSON values
//!
//! The database layer uses SQLx with MySQL. There is no pool: every request
//! opens its own connection and closes it before the response is built.

mod error;

pub use error::DbError;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlrelay_cluster::Endpoint;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Row};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{env_millis, env_parse};

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Login user.
    pub username: String,

    /// Login password.
    pub password: String,

    /// Schema to use.
    pub database: String,

    /// Connect timeout.
    pub connect_timeout: Duration,

    /// Statement timeout.
    pub query_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            username: "user0".to_string(),
            password: String::new(),
            database: "sakila".to_string(),
            connect_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables. Malformed timeouts
    /// are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let username = env_parse("SQLRELAY_DB_USER")?.unwrap_or(defaults.username);
        let password = env_parse("SQLRELAY_DB_PASSWORD")?.unwrap_or(defaults.password);
        let database = env_parse("SQLRELAY_DB_NAME")?.unwrap_or(defaults.database);

        let connect_timeout =
            env_millis("SQLRELAY_DB_CONNECT_TIMEOUT_MS")?.unwrap_or(defaults.connect_timeout);
        let query_timeout =
            env_millis("SQLRELAY_DB_QUERY_TIMEOUT_MS")?.unwrap_or(defaults.query_timeout);

        Ok(Self {
            username,
            password,
            database,
            connect_timeout,
            query_timeout,
        })
    }
}

/// How much of the result set is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Every row.
    #[default]
    All,
    /// First row only.
    First,
}

impl FromStr for FetchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "first" | "one" => Ok(Self::First),
            other => Err(format!("unknown fetch mode: {other}")),
        }
    }
}

/// Rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names, in select order.
    pub columns: Vec<String>,
    /// Row values, one entry per column.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object: Map<String, Value> = self
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect();
                    Value::Object(object)
                })
                .collect(),
        )
    }

    fn from_rows(rows: &[MySqlRow]) -> Self {
        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut result = Self::new(columns);
        for row in rows {
            result.add_row((0..row.len()).map(|i| decode_cell(row, i)).collect());
        }
        result
    }
}

/// Executes one statement against a backend.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        sql: &str,
        mode: FetchMode,
    ) -> Result<QueryResult, DbError>;
}

/// MySQL executor with a scoped connection per call.
#[derive(Debug, Clone)]
pub struct MySqlExecutor {
    config: DbConfig,
}

impl MySqlExecutor {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }

    fn connect_options(&self, endpoint: &Endpoint) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&endpoint.host)
            .port(endpoint.port)
            .username(&self.config.username)
            .password(&self.config.password)
            .database(&self.config.database)
            .charset("utf8mb4")
    }
}

#[async_trait]
impl QueryExecutor for MySqlExecutor {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        sql: &str,
        mode: FetchMode,
    ) -> Result<QueryResult, DbError> {
        let options = self.connect_options(endpoint);

        debug!(backend = %endpoint, name = %endpoint.name, "Connecting to backend");
        let mut conn = match timeout(
            self.config.connect_timeout,
            MySqlConnection::connect_with(&options),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(source)) => {
                return Err(DbError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(DbError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                    timeout: self.config.connect_timeout,
                })
            }
        };

        let outcome = timeout(self.config.query_timeout, fetch(&mut conn, sql, mode)).await;

        let Ok(fetched) = outcome else {
            // Mid-statement: the socket is dropped rather than closed gracefully.
            drop(conn);
            return Err(DbError::QueryTimeout {
                endpoint: endpoint.to_string(),
                timeout: self.config.query_timeout,
            });
        };

        if let Err(e) = conn.close().await {
            warn!(backend = %endpoint, error = %e, "Failed to close backend connection");
        }

        fetched.map_err(|source| DbError::Query {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

/// Run exactly one statement and read its rows.
async fn fetch(
    conn: &mut MySqlConnection,
    sql: &str,
    mode: FetchMode,
) -> Result<QueryResult, sqlx::Error> {
    let rows = match mode {
        FetchMode::All => sqlx::query(sql).fetch_all(&mut *conn).await?,
        FetchMode::First => sqlx::query(sql)
            .fetch_optional(&mut *conn)
            .await?
            .into_iter()
            .collect(),
    };

    Ok(QueryResult::from_rows(&rows))
}

/// Decode one cell into the most specific JSON value available.
fn decode_cell(row: &MySqlRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(index) {
        return Value::from(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<u64>, _>(index) {
        return Value::from(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<f64>, _>(index) {
        return Value::from(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<f32>, _>(index) {
        return Value::from(f64::from(value));
    }
    if let Ok(Some(value)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return Value::String(value.to_string());
    }
    if let Ok(Some(value)) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return Value::String(value.to_string());
    }
    if let Ok(Some(value)) = row.try_get::<Option<chrono::NaiveTime>, _>(index) {
        return Value::String(value.to_string());
    }
    if let Ok(Some(value)) = row.try_get::<Option<Value>, _>(index) {
        return value;
    }
    if let Ok(Some(value)) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return Value::String(String::from_utf8_lossy(&value).into_owned());
    }
    // DECIMAL and friends travel as text on the wire.
    if let Ok(Some(value)) = row.try_get_unchecked::<Option<String>, _>(index) {
        return Value::String(value);
    }
    Value::String("<unsupported>".to_string())
}
