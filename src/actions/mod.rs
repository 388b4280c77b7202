/// Action Dispatch
///
/// Every request names an action. Handlers are grouped the way clients see
/// them (query, tx, schema, monitor, admin); each receives the shared
/// `ActionContext` explicitly, resolves its executor and applies the write
/// gate before anything reaches the database.
pub mod admin;
pub mod monitor;
pub mod query;
pub mod schema;
pub mod tx;

use crate::core::executor::Operation;
use crate::core::session_manager::SessionLease;
use crate::core::{ActionContext, ColdQueryError, Result};
use crate::security::AuthGate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // query
    Read,
    Write,
    Explain,
    Transaction,
    // tx
    Begin,
    Commit,
    Rollback,
    Savepoint,
    Release,
    RollbackTo,
    ListSessions,
    // schema
    List,
    Describe,
    // monitor
    Health,
    Size,
    Pool,
    // admin
    Vacuum,
    Analyze,
    Reindex,
    Stats,
    Settings,
    // auth
    AuthUnlock,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Explain => "explain",
            Action::Transaction => "transaction",
            Action::Begin => "begin",
            Action::Commit => "commit",
            Action::Rollback => "rollback",
            Action::Savepoint => "savepoint",
            Action::Release => "release",
            Action::RollbackTo => "rollback_to",
            Action::ListSessions => "list_sessions",
            Action::List => "list",
            Action::Describe => "describe",
            Action::Health => "health",
            Action::Size => "size",
            Action::Pool => "pool",
            Action::Vacuum => "vacuum",
            Action::Analyze => "analyze",
            Action::Reindex => "reindex",
            Action::Stats => "stats",
            Action::Settings => "settings",
            Action::AuthUnlock => "auth_unlock",
        }
    }

    /// Actions served while the auth gate is still locked
    pub fn bypasses_auth(self) -> bool {
        matches!(self, Action::Health | Action::AuthUnlock)
    }
}

/// Inbound action envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: Action,
    pub sql: Option<String>,
    #[serde(default)]
    pub params: Vec<Value>,
    pub session_id: Option<String>,
    pub autocommit: Option<bool>,
    /// Savepoint name
    pub name: Option<String>,
    pub timeout_ms: Option<u64>,
    pub analyze: Option<bool>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    pub target: Option<String>,
    pub table: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub setting: Option<String>,
    pub value: Option<Value>,
    pub token: Option<String>,
}

impl ActionRequest {
    pub fn new(action: Action) -> Self {
        ActionRequest {
            action,
            sql: None,
            params: Vec::new(),
            session_id: None,
            autocommit: None,
            name: None,
            timeout_ms: None,
            analyze: None,
            operations: Vec::new(),
            target: None,
            table: None,
            limit: None,
            offset: None,
            setting: None,
            value: None,
            token: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = Some(autocommit);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The session id, with a blank one treated as absent.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|id| !id.trim().is_empty())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn require_sql(&self) -> Result<&str> {
        self.sql
            .as_deref()
            .filter(|sql| !sql.trim().is_empty())
            .ok_or_else(|| self.missing("sql"))
    }

    pub(crate) fn require_session(&self) -> Result<&str> {
        self.session_id().ok_or_else(|| self.missing("session_id"))
    }

    pub(crate) fn require_name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| self.missing("name"))
    }

    pub(crate) fn missing(&self, field: &str) -> ColdQueryError {
        ColdQueryError::Validation(format!(
            "'{}' is required for the '{}' action",
            field,
            self.action.name()
        ))
    }
}

/// Adds the session echo to a result produced inside a session.
pub(crate) fn with_session(mut document: Value, lease: Option<&SessionLease>) -> Value {
    if let (Some(lease), Value::Object(map)) = (lease, &mut document) {
        map.insert(
            "session".to_string(),
            json!({
                "id": lease.id(),
                "expires_in_seconds": lease.remaining_ttl().as_secs(),
            }),
        );
    }
    document
}

/// Routes a request to its handler.
///
/// `gate` is the caller's connection-scoped auth state.
pub async fn dispatch(ctx: &ActionContext, gate: &AuthGate, request: &ActionRequest) -> Result<Value> {
    let action = request.action;
    if !action.bypasses_auth() {
        gate.check()?;
    }
    debug!(action = action.name(), session_id = ?request.session_id(), "dispatching action");

    match action {
        Action::Read => query::read(ctx, request).await,
        Action::Write => query::write(ctx, request).await,
        Action::Explain => query::explain(ctx, request).await,
        Action::Transaction => query::transaction(ctx, request).await,
        Action::Begin => tx::begin(ctx, request).await,
        Action::Commit => tx::commit(ctx, request).await,
        Action::Rollback => tx::rollback(ctx, request).await,
        Action::Savepoint => tx::savepoint(ctx, request).await,
        Action::Release => tx::release(ctx, request).await,
        Action::RollbackTo => tx::rollback_to(ctx, request).await,
        Action::ListSessions => tx::list_sessions(ctx, request).await,
        Action::List => schema::list(ctx, request).await,
        Action::Describe => schema::describe(ctx, request).await,
        Action::Health => monitor::health(ctx, request).await,
        Action::Size => monitor::size(ctx, request).await,
        Action::Pool => monitor::pool(ctx, request).await,
        Action::Vacuum | Action::Analyze | Action::Reindex => admin::maintenance(ctx, request).await,
        Action::Stats => admin::stats(ctx, request).await,
        Action::Settings => admin::settings(ctx, request).await,
        Action::AuthUnlock => {
            gate.unlock(request.token.as_deref())?;
            Ok(json!({ "status": "unlocked" }))
        }
    }
}
