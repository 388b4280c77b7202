/// Executor Capabilities
///
/// The three traits every executor implementation is checked against. The
/// SQLite pool and session executors implement them for production; the
/// doubles in `test_utils` implement them for handler tests.
use crate::core::db::result::QueryResult;
use crate::core::db::transaction::TransactionState;
use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Runs one statement and returns its normalized result.
///
/// `timeout` overrides the executor's configured statement deadline.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value], timeout: Option<Duration>) -> Result<QueryResult>;
}

/// A statement runner pinned to one connection with an open transaction.
#[async_trait]
pub trait SessionExecutor: QueryExecutor {
    fn state(&self) -> TransactionState;

    /// Live savepoint names, oldest first
    fn savepoints(&self) -> Vec<String>;

    async fn savepoint(&self, name: &str) -> Result<()>;

    async fn rollback_to(&self, name: &str) -> Result<()>;

    async fn release(&self, name: &str) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;
}

/// The shared, pool-backed default executor.
#[async_trait]
pub trait PooledExecutor: QueryExecutor {
    /// Runs all operations on one connection as a single atomic unit.
    async fn execute_batch(&self, operations: &[Operation], timeout: Option<Duration>) -> Result<Vec<QueryResult>>;

    /// Runs operations in order on one connection, each in autocommit mode.
    /// For statements whose effect is scoped to the connection.
    async fn execute_sequence(&self, operations: &[Operation], timeout: Option<Duration>) -> Result<Vec<QueryResult>>;

    /// Checks out a dedicated connection and opens a transaction on it.
    async fn create_session(&self) -> Result<Arc<dyn SessionExecutor>>;

    /// Releases pooled resources; `destroy` also forbids reconnecting.
    async fn disconnect(&self, destroy: bool) -> Result<()>;

    fn status(&self) -> PoolStatus;
}

/// One statement of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Operation {
    pub fn new(sql: impl Into<String>) -> Self {
        Operation {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Snapshot of the pool for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: u32,
    pub connections: u32,
    pub idle_connections: u32,
}
