/// Connection Management Module
///
/// Owns the bounded r2d2 pool of SQLite connections and implements the
/// default, autocommit-style execution path. Every call checks a connection
/// out for its own duration only; the RAII guard returns it on every path.
use crate::config::DatabaseConfig;
use crate::core::db::query::{bind_params, require_sql, reset_transaction, run_statement, StatementType};
use crate::core::db::result::QueryResult;
use crate::core::db::session::SqliteSessionExecutor;
use crate::core::db::worker::run_blocking;
use crate::core::executor::{Operation, PoolStatus, PooledExecutor, QueryExecutor, SessionExecutor};
use crate::core::{ColdQueryError, Result};
use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

pub type SqlitePool = Pool<SqliteConnectionManager>;
pub type SqliteConnection = PooledConnection<SqliteConnectionManager>;

#[derive(Default)]
struct PoolState {
    pool: Option<SqlitePool>,
    destroyed: bool,
}

/// Pool-backed executor over one SQLite database file.
pub struct SqlitePoolExecutor {
    config: DatabaseConfig,
    state: Mutex<PoolState>,
}

impl SqlitePoolExecutor {
    /// Creates an executor that connects lazily on first use.
    pub fn new(config: DatabaseConfig) -> Self {
        SqlitePoolExecutor {
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Creates an executor and establishes the pool immediately.
    ///
    /// Used at startup, where an unreachable database is fatal.
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        let executor = Self::new(config);
        executor.pool().await?;
        Ok(executor)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| ColdQueryError::Internal("Failed to acquire pool state lock".to_string()))
    }

    /// Returns the live pool, building it if needed.
    async fn pool(&self) -> Result<SqlitePool> {
        {
            let state = self.lock_state()?;
            if state.destroyed {
                return Err(ColdQueryError::Internal(
                    "executor has been destroyed and cannot reconnect".to_string(),
                ));
            }
            if let Some(pool) = &state.pool {
                return Ok(pool.clone());
            }
        }

        let config = self.config.clone();
        let built = tokio::task::spawn_blocking(move || build_pool(&config))
            .await
            .map_err(|e| ColdQueryError::Internal(format!("pool builder failed: {}", e)))??;

        let mut state = self.lock_state()?;
        if state.destroyed {
            return Err(ColdQueryError::Internal(
                "executor has been destroyed and cannot reconnect".to_string(),
            ));
        }
        // another caller may have won the race; keep the first pool
        Ok(state.pool.get_or_insert(built).clone())
    }

    /// Checks out a connection, waiting at most the configured checkout timeout.
    async fn checkout(&self) -> Result<SqliteConnection> {
        let pool = self.pool().await?;
        let wait = self.config.pool_timeout();
        tokio::task::spawn_blocking(move || -> Result<SqliteConnection> {
            let conn = pool.get().map_err(|e| {
                ColdQueryError::Timeout(format!(
                    "no database connection available within {} ms: {}",
                    wait.as_millis(),
                    e
                ))
            })?;
            if reset_transaction(&conn)? {
                warn!("checked out a connection with a stale transaction; rolled it back");
            }
            Ok(conn)
        })
        .await
        .map_err(|e| ColdQueryError::Internal(format!("checkout worker failed: {}", e)))?
    }

    fn deadline(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or_else(|| self.config.statement_timeout())
    }
}

fn prepare_operations(operations: &[Operation]) -> Result<Vec<(String, Vec<SqlValue>)>> {
    operations
        .iter()
        .map(|op| -> Result<(String, Vec<SqlValue>)> { Ok((require_sql(&op.sql)?, bind_params(&op.params)?)) })
        .collect()
}

fn build_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let busy_timeout = config.busy_timeout();
    let manager = SqliteConnectionManager::file(&config.path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
        ",
        )
    });

    let pool = Pool::builder()
        .max_size(config.pool_size)
        .min_idle(Some(1))
        .connection_timeout(config.pool_timeout())
        .build(manager)
        .map_err(|e| {
            ColdQueryError::Timeout(format!("could not establish connection pool for '{}': {}", config.path, e))
        })?;

    info!(path = %config.path, pool_size = config.pool_size, "connection pool ready");
    Ok(pool)
}

#[async_trait]
impl QueryExecutor for SqlitePoolExecutor {
    async fn execute(&self, sql: &str, params: &[Value], timeout: Option<Duration>) -> Result<QueryResult> {
        let sql = require_sql(sql)?;
        let params = bind_params(params)?;
        let conn = self.checkout().await?;

        let (_conn, outcome) = run_blocking(conn, self.deadline(timeout), move |c| {
            let outcome = run_statement(c, &sql, &params);
            // a BEGIN sent through the pool must not outlive the call
            if reset_transaction(c)? {
                debug!("rolled back transaction left open by a pooled statement");
            }
            outcome
        })
        .await;
        outcome
    }
}

#[async_trait]
impl PooledExecutor for SqlitePoolExecutor {
    async fn execute_batch(&self, operations: &[Operation], timeout: Option<Duration>) -> Result<Vec<QueryResult>> {
        if operations.is_empty() {
            return Err(ColdQueryError::Validation(
                "a transaction batch needs at least one operation".to_string(),
            ));
        }
        let statements = prepare_operations(operations)?;
        if let Some((sql, _)) = statements
            .iter()
            .find(|(sql, _)| StatementType::from_sql(sql) == StatementType::Transaction)
        {
            return Err(ColdQueryError::Validation(format!(
                "transaction control is not allowed inside a batch: '{}'",
                sql.trim()
            )));
        }
        let conn = self.checkout().await?;

        let (_conn, outcome) = run_blocking(conn, self.deadline(timeout), move |c| {
            let tx = c.unchecked_transaction()?;
            let mut results = Vec::with_capacity(statements.len());
            for (sql, params) in &statements {
                results.push(run_statement(&tx, sql, params)?);
                if tx.is_autocommit() {
                    return Err(ColdQueryError::Validation(format!(
                        "statement '{}' ended the batch transaction",
                        sql.trim()
                    )));
                }
            }
            tx.commit()?;
            Ok(results)
        })
        .await;
        outcome
    }

    async fn execute_sequence(&self, operations: &[Operation], timeout: Option<Duration>) -> Result<Vec<QueryResult>> {
        let statements = prepare_operations(operations)?;
        let conn = self.checkout().await?;

        let (_conn, outcome) = run_blocking(conn, self.deadline(timeout), move |c| {
            let mut results = Vec::with_capacity(statements.len());
            let mut outcome = Ok(());
            for (sql, params) in &statements {
                match run_statement(c, sql, params) {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
            if reset_transaction(c)? {
                debug!("rolled back transaction left open by a pooled sequence");
            }
            outcome.map(|()| results)
        })
        .await;
        outcome
    }

    async fn create_session(&self) -> Result<Arc<dyn SessionExecutor>> {
        let conn = self.checkout().await?;
        let (conn, outcome) = run_blocking(conn, None, |c| c.execute_batch("BEGIN").map_err(Into::into)).await;
        outcome?;
        let conn = conn.ok_or_else(|| ColdQueryError::Internal("connection lost while beginning".to_string()))?;
        Ok(Arc::new(SqliteSessionExecutor::new(conn, self.config.statement_timeout())))
    }

    async fn disconnect(&self, destroy: bool) -> Result<()> {
        let mut state = self.lock_state()?;
        state.pool = None;
        state.destroyed |= destroy;
        info!(destroy, "connection pool released");
        Ok(())
    }

    fn status(&self) -> PoolStatus {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return PoolStatus::default(),
        };
        match &state.pool {
            Some(pool) => {
                let current = pool.state();
                PoolStatus {
                    max_size: pool.max_size(),
                    connections: current.connections,
                    idle_connections: current.idle_connections,
                }
            }
            None => PoolStatus {
                max_size: self.config.pool_size,
                ..PoolStatus::default()
            },
        }
    }
}
