/// Session-Bound Execution
///
/// A `SqliteSessionExecutor` owns one pooled connection for the lifetime of a
/// transaction. Calls on the same session are serialized by an async mutex
/// around the connection slot; the transaction ledger records what the
/// database has accepted so far.
use crate::core::db::connection::SqliteConnection;
use crate::core::db::query::{bind_params, require_sql, run_statement, StatementType};
use crate::core::db::result::QueryResult;
use crate::core::db::transaction::{SavepointPlan, TransactionLedger, TransactionState};
use crate::core::db::worker::run_blocking;
use crate::core::executor::{QueryExecutor, SessionExecutor};
use crate::core::{ColdQueryError, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct SqliteSessionExecutor {
    conn: tokio::sync::Mutex<Option<SqliteConnection>>,
    ledger: Mutex<TransactionLedger>,
    statement_timeout: Option<Duration>,
}

impl SqliteSessionExecutor {
    /// Wraps a connection on which `BEGIN` has already succeeded.
    pub fn new(conn: SqliteConnection, statement_timeout: Option<Duration>) -> Self {
        SqliteSessionExecutor {
            conn: tokio::sync::Mutex::new(Some(conn)),
            ledger: Mutex::new(TransactionLedger::new()),
            statement_timeout,
        }
    }

    fn ledger(&self) -> Result<MutexGuard<'_, TransactionLedger>> {
        self.ledger
            .lock()
            .map_err(|_| ColdQueryError::Internal("Failed to acquire transaction ledger lock".to_string()))
    }

    fn take_connection(slot: &mut Option<SqliteConnection>) -> Result<SqliteConnection> {
        slot.take()
            .ok_or_else(|| ColdQueryError::SessionClosed("session connection already released".to_string()))
    }

    /// Runs `work` inside the open transaction.
    ///
    /// If the engine abandoned the transaction on its own (interrupt, I/O
    /// error, a worker panic) the session becomes rolled back and its
    /// connection goes back to the pool.
    async fn run<T, F>(&self, slot: &mut Option<SqliteConnection>, deadline: Option<Duration>, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        {
            let ledger = self.ledger()?;
            ledger.ensure_open()?;
        }
        let conn = Self::take_connection(slot)?;
        let (conn, outcome) = run_blocking(conn, deadline, work).await;

        match conn {
            Some(conn) if !conn.is_autocommit() => *slot = Some(conn),
            Some(_) => {
                warn!("engine ended the session transaction; marking it rolled back");
                self.ledger()?.finish(TransactionState::RolledBack);
            }
            None => self.ledger()?.finish(TransactionState::RolledBack),
        }
        outcome
    }

    async fn end(&self, statement: &'static str, on_success: TransactionState) -> Result<()> {
        let mut slot = self.conn.lock().await;
        {
            let ledger = self.ledger()?;
            ledger.ensure_open()?;
        }
        let conn = Self::take_connection(&mut slot)?;

        let (conn, outcome) = run_blocking(conn, None, move |c| {
            let ended = c.execute_batch(statement);
            if ended.is_err() && !c.is_autocommit() {
                // a failed COMMIT leaves the transaction open
                if let Err(e) = c.execute_batch("ROLLBACK") {
                    warn!(error = %e, "rollback after failed {} also failed", statement);
                }
            }
            ended.map_err(ColdQueryError::from)
        })
        .await;

        let final_state = if outcome.is_ok() {
            on_success
        } else {
            TransactionState::RolledBack
        };
        self.ledger()?.finish(final_state);
        // back to the pool
        drop(conn);
        info!(state = ?final_state, "session transaction ended");
        outcome
    }
}

#[async_trait]
impl QueryExecutor for SqliteSessionExecutor {
    async fn execute(&self, sql: &str, params: &[Value], timeout: Option<Duration>) -> Result<QueryResult> {
        let sql = require_sql(sql)?;
        if StatementType::from_sql(&sql) == StatementType::Transaction {
            return Err(ColdQueryError::Validation(
                "transaction control statements are not accepted inside a session; \
                 use the begin, commit, rollback, savepoint, release and rollback_to actions"
                    .to_string(),
            ));
        }
        let params = bind_params(params)?;
        let deadline = timeout.or(self.statement_timeout);

        let mut slot = self.conn.lock().await;
        self.run(&mut slot, deadline, move |c| run_statement(c, &sql, &params))
            .await
    }
}

#[async_trait]
impl SessionExecutor for SqliteSessionExecutor {
    fn state(&self) -> TransactionState {
        self.ledger
            .lock()
            .map(|ledger| ledger.state())
            .unwrap_or(TransactionState::RolledBack)
    }

    fn savepoints(&self) -> Vec<String> {
        self.ledger
            .lock()
            .map(|ledger| ledger.savepoints().to_vec())
            .unwrap_or_default()
    }

    async fn savepoint(&self, name: &str) -> Result<()> {
        let mut slot = self.conn.lock().await;
        let plan = self.ledger()?.plan_savepoint(name)?;
        let sql = match plan {
            SavepointPlan::Create => format!("SAVEPOINT \"{}\"", name),
            SavepointPlan::Retarget => format!("RELEASE SAVEPOINT \"{0}\"; SAVEPOINT \"{0}\"", name),
        };
        self.run(&mut slot, None, move |c| c.execute_batch(&sql).map_err(Into::into))
            .await?;
        self.ledger()?.record_savepoint(name);
        debug!(savepoint = name, ?plan, "savepoint recorded");
        Ok(())
    }

    async fn rollback_to(&self, name: &str) -> Result<()> {
        let mut slot = self.conn.lock().await;
        self.ledger()?.position(name)?;
        let sql = format!("ROLLBACK TO SAVEPOINT \"{}\"", name);
        self.run(&mut slot, None, move |c| c.execute_batch(&sql).map_err(Into::into))
            .await?;
        self.ledger()?.record_rollback_to(name);
        Ok(())
    }

    async fn release(&self, name: &str) -> Result<()> {
        let mut slot = self.conn.lock().await;
        self.ledger()?.position(name)?;
        let sql = format!("RELEASE SAVEPOINT \"{}\"", name);
        self.run(&mut slot, None, move |c| c.execute_batch(&sql).map_err(Into::into))
            .await?;
        self.ledger()?.record_release(name);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.end("COMMIT", TransactionState::Committed).await
    }

    async fn rollback(&self) -> Result<()> {
        self.end("ROLLBACK", TransactionState::RolledBack).await
    }
}

impl Drop for SqliteSessionExecutor {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            if conn.is_autocommit() {
                return;
            }
            match conn.execute_batch("ROLLBACK") {
                Ok(()) => debug!("rolled back abandoned session transaction"),
                Err(e) => warn!(error = %e, "failed to roll back abandoned session transaction"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::core::db::connection::SqlitePoolExecutor;
    use crate::core::executor::PooledExecutor;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir, pool_size: u32) -> SqlitePoolExecutor {
        let config = DatabaseConfig {
            path: dir.path().join("session.db").to_string_lossy().into_owned(),
            pool_size,
            pool_timeout_ms: 200,
            ..DatabaseConfig::default()
        };
        let pool = SqlitePoolExecutor::connect(config).await.unwrap();
        pool.execute("CREATE TABLE t (v INTEGER)", &[], None).await.unwrap();
        pool
    }

    async fn count(pool: &SqlitePoolExecutor) -> i64 {
        let result = pool.execute("SELECT count(*) AS n FROM t", &[], None).await.unwrap();
        result.rows()[0]["n"].as_i64().unwrap()
    }

    async fn values(session: &dyn SessionExecutor) -> Vec<i64> {
        let result = session.execute("SELECT v FROM t ORDER BY v", &[], None).await.unwrap();
        result.rows().iter().map(|r| r["v"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 2).await;
        let session = pool.create_session().await.unwrap();

        session.execute("INSERT INTO t VALUES (?1)", &[json!(1)], None).await.unwrap();
        assert_eq!(count(&pool).await, 0);

        session.commit().await.unwrap();
        assert_eq!(session.state(), TransactionState::Committed);
        assert_eq!(count(&pool).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_calls_run_in_issue_order() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 2).await;
        let session = pool.create_session().await.unwrap();

        let slow = session.execute(
            "INSERT INTO t SELECT 1 FROM \
             (WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 300000) SELECT x FROM c) \
             WHERE x = 300000",
            &[],
            None,
        );
        let fast = session.execute("INSERT INTO t VALUES (2)", &[], None);
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.unwrap().row_count(), 1);
        assert_eq!(fast.unwrap().row_count(), 1);

        let result = session.execute("SELECT v FROM t ORDER BY rowid", &[], None).await.unwrap();
        let order: Vec<i64> = result.rows().iter().map(|r| r["v"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(session.state(), TransactionState::Open);
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminal_session_rejects_calls() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 2).await;
        let session = pool.create_session().await.unwrap();
        session.rollback().await.unwrap();

        assert_eq!(session.state(), TransactionState::RolledBack);
        let err = session.execute("SELECT 1", &[], None).await.unwrap_err();
        assert_eq!(err.kind(), "session_closed");
        assert_eq!(session.commit().await.unwrap_err().kind(), "session_closed");
        assert_eq!(session.savepoint("a").await.unwrap_err().kind(), "session_closed");
    }

    #[tokio::test]
    async fn test_savepoint_rollback_to_and_release() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 2).await;
        let session = pool.create_session().await.unwrap();

        session.execute("INSERT INTO t VALUES (1)", &[], None).await.unwrap();
        session.savepoint("a").await.unwrap();
        session.execute("INSERT INTO t VALUES (2)", &[], None).await.unwrap();
        session.savepoint("b").await.unwrap();
        session.execute("INSERT INTO t VALUES (3)", &[], None).await.unwrap();

        session.rollback_to("a").await.unwrap();
        assert_eq!(values(session.as_ref()).await, vec![1]);
        assert_eq!(session.savepoints(), vec!["a".to_string()]);

        // "a" survives a rollback to it, so it can be rolled back to again
        session.execute("INSERT INTO t VALUES (4)", &[], None).await.unwrap();
        session.rollback_to("a").await.unwrap();
        assert_eq!(values(session.as_ref()).await, vec![1]);

        session.release("a").await.unwrap();
        assert!(session.savepoints().is_empty());
        assert_eq!(session.rollback_to("a").await.unwrap_err().kind(), "validation_error");

        session.commit().await.unwrap();
        assert_eq!(count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_reused_savepoint_name_moves_it() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 2).await;
        let session = pool.create_session().await.unwrap();

        session.savepoint("a").await.unwrap();
        session.execute("INSERT INTO t VALUES (1)", &[], None).await.unwrap();
        session.savepoint("b").await.unwrap();
        session.savepoint("a").await.unwrap();
        assert_eq!(session.savepoints(), vec!["a".to_string()]);

        session.execute("INSERT INTO t VALUES (2)", &[], None).await.unwrap();
        session.rollback_to("a").await.unwrap();
        assert_eq!(values(session.as_ref()).await, vec![1]);
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_control_sql_is_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 2).await;
        let session = pool.create_session().await.unwrap();

        for sql in ["COMMIT", "rollback", "BEGIN", "SAVEPOINT x", "END"] {
            let err = session.execute(sql, &[], None).await.unwrap_err();
            assert_eq!(err.kind(), "validation_error", "{}", sql);
        }
        assert_eq!(session.state(), TransactionState::Open);
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_commit_ends_rolled_back() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 2).await;
        pool.execute("CREATE TABLE parent (id INTEGER PRIMARY KEY)", &[], None)
            .await
            .unwrap();
        pool.execute(
            "CREATE TABLE child (pid INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED)",
            &[],
            None,
        )
        .await
        .unwrap();

        let session = pool.create_session().await.unwrap();
        session.execute("INSERT INTO child VALUES (5)", &[], None).await.unwrap();
        let err = session.commit().await.unwrap_err();
        assert_eq!(err.kind(), "statement_error");
        assert_eq!(session.state(), TransactionState::RolledBack);

        let result = pool.execute("SELECT count(*) AS n FROM child", &[], None).await.unwrap();
        assert_eq!(result.rows()[0]["n"], json!(0));
    }

    #[tokio::test]
    async fn test_dropped_session_rolls_back_and_frees_connection() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 1).await;

        let session = pool.create_session().await.unwrap();
        session.execute("INSERT INTO t VALUES (1)", &[], None).await.unwrap();
        drop(session);

        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_interrupted_statement_keeps_or_ends_session_consistently() {
        let dir = TempDir::new().unwrap();
        let pool = setup(&dir, 2).await;
        let session = pool.create_session().await.unwrap();

        let slow = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c";
        let err = session
            .execute(slow, &[], Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");

        // a read interrupted inside a transaction leaves it open
        assert_eq!(session.state(), TransactionState::Open);
        assert!(session.execute("SELECT 1", &[], None).await.is_ok());
        session.rollback().await.unwrap();
    }
}
