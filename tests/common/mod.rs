//! Shared fixture: a real SQLite-backed action context in a temp directory.
#![allow(dead_code)]

use coldquery::actions::{dispatch, Action, ActionRequest};
use coldquery::config::DatabaseConfig;
use coldquery::core::db::SqlitePoolExecutor;
use coldquery::core::executor::PooledExecutor;
use coldquery::core::session_manager::SessionManager;
use coldquery::core::{ActionContext, Result};
use coldquery::security::AuthGate;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Fixture {
    // keeps the database file alive
    pub dir: TempDir,
    pub ctx: ActionContext,
    pub gate: AuthGate,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with(Duration::from_secs(60), 4).await
    }

    pub async fn with(ttl: Duration, pool_size: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("coldquery.db").to_string_lossy().into_owned(),
            pool_size,
            pool_timeout_ms: 500,
            ..DatabaseConfig::default()
        };
        let pool: Arc<dyn PooledExecutor> = Arc::new(SqlitePoolExecutor::connect(config).await.unwrap());
        let manager = Arc::new(SessionManager::new(pool.clone(), ttl));
        Fixture {
            dir,
            ctx: ActionContext::new(pool, manager),
            gate: AuthGate::disabled(),
        }
    }

    pub async fn call(&self, request: ActionRequest) -> Result<Value> {
        dispatch(&self.ctx, &self.gate, &request).await
    }

    pub async fn begin(&self) -> String {
        let out = self.call(ActionRequest::new(Action::Begin)).await.unwrap();
        out["session_id"].as_str().unwrap().to_string()
    }

    /// Write inside a session
    pub async fn write_in(&self, session_id: &str, sql: &str) -> Result<Value> {
        self.call(ActionRequest::new(Action::Write).with_sql(sql).with_session(session_id))
            .await
    }

    /// Autocommit write through the pool
    pub async fn write_now(&self, sql: &str) -> Result<Value> {
        self.call(ActionRequest::new(Action::Write).with_sql(sql).with_autocommit(true))
            .await
    }

    /// Read through the pool
    pub async fn read(&self, sql: &str) -> Result<Value> {
        self.call(ActionRequest::new(Action::Read).with_sql(sql)).await
    }

    pub async fn read_in(&self, session_id: &str, sql: &str) -> Result<Value> {
        self.call(ActionRequest::new(Action::Read).with_sql(sql).with_session(session_id))
            .await
    }

    pub async fn end(&self, action: Action, session_id: &str) -> Result<Value> {
        self.call(ActionRequest::new(action).with_session(session_id)).await
    }
}
