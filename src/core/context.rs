/// Action Context
///
/// The process-wide bundle every action handler receives: the shared pool
/// executor and the session manager. Built once at startup, read-only after.
use crate::config::Config;
use crate::core::db::connection::SqlitePoolExecutor;
use crate::core::db::result::QueryResult;
use crate::core::executor::{PooledExecutor, QueryExecutor};
use crate::core::session_manager::{SessionLease, SessionManager};
use crate::core::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct ActionContext {
    executor: Arc<dyn PooledExecutor>,
    session_manager: Arc<SessionManager>,
}

impl ActionContext {
    pub fn new(executor: Arc<dyn PooledExecutor>, session_manager: Arc<SessionManager>) -> Self {
        ActionContext {
            executor,
            session_manager,
        }
    }

    /// Builds the SQLite pool, the session manager and its reaper.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn connect(config: &Config) -> Result<Self> {
        config.validate()?;
        let executor: Arc<dyn PooledExecutor> = Arc::new(SqlitePoolExecutor::connect(config.database.clone()).await?);
        let session_manager = Arc::new(SessionManager::new(executor.clone(), config.sessions.ttl()));
        session_manager.spawn_reaper(config.sessions.reaper_interval());
        info!(
            ttl_secs = config.sessions.ttl_secs,
            reaper_interval_secs = config.sessions.reaper_interval_secs,
            "session manager ready"
        );
        Ok(Self::new(executor, session_manager))
    }

    pub fn executor(&self) -> &Arc<dyn PooledExecutor> {
        &self.executor
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Picks the executor for a request: the named session, or the pool.
    ///
    /// A blank session id counts as absent.
    pub fn resolve_executor(&self, session_id: Option<&str>) -> Result<ResolvedExecutor> {
        match session_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Ok(ResolvedExecutor::Session(self.session_manager.resolve(id)?)),
            None => Ok(ResolvedExecutor::Pool(Arc::clone(&self.executor))),
        }
    }

    /// Rolls back every session and releases the pool for good.
    pub async fn shutdown(&self) -> Result<()> {
        self.session_manager.shutdown().await?;
        self.executor.disconnect(true).await
    }
}

/// The executor a request runs on
pub enum ResolvedExecutor {
    Pool(Arc<dyn PooledExecutor>),
    Session(SessionLease),
}

impl ResolvedExecutor {
    pub fn lease(&self) -> Option<&SessionLease> {
        match self {
            ResolvedExecutor::Pool(_) => None,
            ResolvedExecutor::Session(lease) => Some(lease),
        }
    }
}

#[async_trait]
impl QueryExecutor for ResolvedExecutor {
    async fn execute(&self, sql: &str, params: &[Value], timeout: Option<Duration>) -> Result<QueryResult> {
        match self {
            ResolvedExecutor::Pool(pool) => pool.execute(sql, params, timeout).await,
            ResolvedExecutor::Session(lease) => lease.executor().execute(sql, params, timeout).await,
        }
    }
}
