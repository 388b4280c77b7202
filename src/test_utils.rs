/// # Test Utilities Module
///
/// Deterministic doubles for the executor traits, used by handler and
/// session-manager tests that need to control what the "database" answers.
///
/// - `MockExecutor` stands in for the pool executor
/// - `MockSession` stands in for a session-bound executor, with real
///   transaction bookkeeping so state transitions behave like production
///
/// Both append every statement they receive to a shared log.
use crate::core::db::result::QueryResult;
use crate::core::db::transaction::{TransactionLedger, TransactionState};
use crate::core::executor::{Operation, PoolStatus, PooledExecutor, QueryExecutor, SessionExecutor};
use crate::core::{ColdQueryError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canned behavior shared by a mock pool and every session it creates
#[derive(Debug, Clone, Default)]
struct Behavior {
    /// (substring, result); first match wins
    responses: Vec<(String, QueryResult)>,
    /// (substring, engine message)
    failures: Vec<(String, String)>,
    latency: Option<Duration>,
}

impl Behavior {
    async fn answer(&self, log: &Mutex<Vec<String>>, sql: &str) -> Result<QueryResult> {
        if let Ok(mut log) = log.lock() {
            log.push(sql.to_string());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some((_, message)) = self.failures.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            return Err(engine_error(message));
        }
        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| QueryResult::affected(0)))
    }
}

/// A statement error as the engine would report it.
pub fn engine_error(message: &str) -> ColdQueryError {
    ColdQueryError::Statement(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(1),
        Some(message.to_string()),
    ))
}

fn lock_log(log: &Mutex<Vec<String>>) -> Vec<String> {
    log.lock().map(|l| l.clone()).unwrap_or_default()
}

/// Pool executor double.
#[derive(Debug, Default)]
pub struct MockExecutor {
    behavior: Behavior,
    log: Arc<Mutex<Vec<String>>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    refuse_sessions: bool,
    disconnected: AtomicBool,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements containing `pattern` answer with `result`.
    pub fn with_response(mut self, pattern: &str, result: QueryResult) -> Self {
        self.behavior.responses.push((pattern.to_string(), result));
        self
    }

    /// Statements containing `pattern` fail with a statement error.
    pub fn fail_on(mut self, pattern: &str, message: &str) -> Self {
        self.behavior.failures.push((pattern.to_string(), message.to_string()));
        self
    }

    /// Every statement sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.behavior.latency = Some(latency);
        self
    }

    /// `create_session` fails as if the pool were exhausted.
    pub fn exhausted(mut self) -> Self {
        self.refuse_sessions = true;
        self
    }

    /// Statements seen by the pool and its sessions, in order.
    pub fn executed(&self) -> Vec<String> {
        lock_log(&self.log)
    }

    /// Sessions handed out so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(&self, sql: &str, _params: &[Value], _timeout: Option<Duration>) -> Result<QueryResult> {
        self.behavior.answer(&self.log, sql).await
    }
}

#[async_trait]
impl PooledExecutor for MockExecutor {
    async fn execute_batch(&self, operations: &[Operation], timeout: Option<Duration>) -> Result<Vec<QueryResult>> {
        let mut results = Vec::with_capacity(operations.len());
        for op in operations {
            results.push(self.execute(&op.sql, &op.params, timeout).await?);
        }
        Ok(results)
    }

    async fn execute_sequence(&self, operations: &[Operation], timeout: Option<Duration>) -> Result<Vec<QueryResult>> {
        self.execute_batch(operations, timeout).await
    }

    async fn create_session(&self) -> Result<Arc<dyn SessionExecutor>> {
        if self.refuse_sessions {
            return Err(ColdQueryError::Timeout("no database connection available".to_string()));
        }
        let session = Arc::new(MockSession {
            behavior: self.behavior.clone(),
            log: Arc::clone(&self.log),
            ledger: Mutex::new(TransactionLedger::new()),
        });
        if let Ok(mut log) = self.log.lock() {
            log.push("BEGIN".to_string());
        }
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(Arc::clone(&session));
        }
        Ok(session)
    }

    async fn disconnect(&self, _destroy: bool) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            max_size: 4,
            connections: 1,
            idle_connections: 1,
        }
    }
}

/// Session executor double.
#[derive(Debug)]
pub struct MockSession {
    behavior: Behavior,
    log: Arc<Mutex<Vec<String>>>,
    ledger: Mutex<TransactionLedger>,
}

impl MockSession {
    fn with_ledger<T>(&self, f: impl FnOnce(&mut TransactionLedger) -> Result<T>) -> Result<T> {
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| ColdQueryError::Internal("mock ledger poisoned".to_string()))?;
        f(&mut ledger)
    }

    fn record(&self, sql: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(sql);
        }
    }
}

#[async_trait]
impl QueryExecutor for MockSession {
    async fn execute(&self, sql: &str, _params: &[Value], _timeout: Option<Duration>) -> Result<QueryResult> {
        self.with_ledger(|ledger| ledger.ensure_open())?;
        self.behavior.answer(&self.log, sql).await
    }
}

#[async_trait]
impl SessionExecutor for MockSession {
    fn state(&self) -> TransactionState {
        self.ledger
            .lock()
            .map(|l| l.state())
            .unwrap_or(TransactionState::RolledBack)
    }

    fn savepoints(&self) -> Vec<String> {
        self.ledger
            .lock()
            .map(|l| l.savepoints().to_vec())
            .unwrap_or_default()
    }

    async fn savepoint(&self, name: &str) -> Result<()> {
        self.with_ledger(|ledger| {
            ledger.plan_savepoint(name)?;
            ledger.record_savepoint(name);
            Ok(())
        })?;
        self.record(format!("SAVEPOINT {}", name));
        Ok(())
    }

    async fn rollback_to(&self, name: &str) -> Result<()> {
        self.with_ledger(|ledger| {
            ledger.position(name)?;
            ledger.record_rollback_to(name);
            Ok(())
        })?;
        self.record(format!("ROLLBACK TO SAVEPOINT {}", name));
        Ok(())
    }

    async fn release(&self, name: &str) -> Result<()> {
        self.with_ledger(|ledger| {
            ledger.position(name)?;
            ledger.record_release(name);
            Ok(())
        })?;
        self.record(format!("RELEASE SAVEPOINT {}", name));
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.with_ledger(|ledger| {
            ledger.ensure_open()?;
            ledger.finish(TransactionState::Committed);
            Ok(())
        })?;
        self.record("COMMIT".to_string());
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.with_ledger(|ledger| {
            ledger.ensure_open()?;
            ledger.finish(TransactionState::RolledBack);
            Ok(())
        })?;
        self.record("ROLLBACK".to_string());
        Ok(())
    }
}
