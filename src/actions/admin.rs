/// Admin actions: maintenance statements, table statistics and pragma settings
use crate::actions::{with_session, Action, ActionRequest};
use crate::core::db::query::{is_write_statement, quote_identifier, validate_identifier};
use crate::core::db::schema::{list_objects, ObjectKind};
use crate::core::executor::{Operation, PooledExecutor, QueryExecutor};
use crate::core::{ActionContext, ColdQueryError, Result};
use crate::security::allow_write;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::info;

static SETTING_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-\.]+$").expect("setting value pattern is valid"));

/// VACUUM, ANALYZE and REINDEX. All three are write-gated.
pub async fn maintenance(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    allow_write(request.session_id(), request.autocommit)?;

    let table = request.table.as_deref();
    let sql = match (request.action, table) {
        (Action::Vacuum, None) => "VACUUM".to_string(),
        (Action::Vacuum, Some(_)) => {
            return Err(ColdQueryError::Validation(
                "vacuum rebuilds the whole database and does not take a table".to_string(),
            ))
        }
        (Action::Analyze, None) => "ANALYZE".to_string(),
        (Action::Analyze, Some(t)) => format!("ANALYZE {}", quote_identifier("table", t)?),
        (Action::Reindex, None) => "REINDEX".to_string(),
        (Action::Reindex, Some(t)) => format!("REINDEX {}", quote_identifier("table", t)?),
        (other, _) => {
            return Err(ColdQueryError::Internal(format!(
                "'{}' is not a maintenance action",
                other.name()
            )))
        }
    };

    let executor = ctx.resolve_executor(request.session_id())?;
    executor.execute(&sql, &[], request.timeout()).await?;
    info!(operation = request.action.name(), table = ?table, "maintenance completed");
    let document = json!({
        "status": "completed",
        "operation": request.action.name(),
        "table": table,
    });
    Ok(with_session(document, executor.lease()))
}

/// Row counts for one table, or for every user table.
pub async fn stats(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let executor = ctx.resolve_executor(request.session_id())?;
    let tables: Vec<String> = match request.table.as_deref() {
        Some(table) => {
            validate_identifier("table", table)?;
            vec![table.to_string()]
        }
        None => list_objects(&executor, ObjectKind::Table, i64::MAX as u64, 0)
            .await?
            .rows()
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect(),
    };

    let mut entries = Vec::with_capacity(tables.len());
    for table in &tables {
        let sql = format!("SELECT count(*) AS row_count FROM {}", quote_identifier("table", table)?);
        let result = executor.execute(&sql, &[], request.timeout()).await?;
        let row_count = result
            .rows()
            .first()
            .and_then(|row| row.get("row_count").cloned())
            .unwrap_or(Value::Null);
        entries.push(json!({ "table": table, "row_count": row_count }));
    }
    Ok(with_session(json!({ "tables": entries }), executor.lease()))
}

/// Formats a pragma assignment value. Only plain literals are accepted.
fn pragma_literal(value: &Value) -> Result<String> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(true) => Ok("ON".to_string()),
        Value::Bool(false) => Ok("OFF".to_string()),
        Value::String(s) if SETTING_VALUE.is_match(s) => Ok(format!("'{}'", s)),
        other => Err(ColdQueryError::Validation(format!(
            "invalid setting value {}: expected a number, a boolean or a plain word",
            other
        ))),
    }
}

/// Reads a pragma, or sets it when `value` is given and reads it back.
///
/// Both statements run on the same connection. Connection-scoped pragmas
/// only affect that connection.
pub async fn settings(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let setting = request.setting.as_deref().ok_or_else(|| request.missing("setting"))?;
    validate_identifier("setting", setting)?;
    let read_back = format!("PRAGMA {}", setting);

    let mut operations = Vec::with_capacity(2);
    match &request.value {
        Some(value) => {
            let literal = pragma_literal(value)?;
            allow_write(request.session_id(), request.autocommit)?;
            operations.push(Operation::new(format!("PRAGMA {} = {}", setting, literal)));
        }
        // some pragmas act when merely named
        None if is_write_statement(&read_back) => allow_write(request.session_id(), request.autocommit)?,
        None => {}
    }
    operations.push(Operation::new(read_back));
    let assigned = operations.len() > 1;

    let executor = ctx.resolve_executor(request.session_id())?;
    let mut results = match executor.lease() {
        Some(lease) => {
            let mut results = Vec::with_capacity(operations.len());
            for op in &operations {
                results.push(lease.executor().execute(&op.sql, &op.params, request.timeout()).await?);
            }
            results
        }
        None => ctx.executor().execute_sequence(&operations, request.timeout()).await?,
    };
    if assigned {
        info!(setting, "setting changed");
    }
    let current = results
        .pop()
        .ok_or_else(|| ColdQueryError::Internal("setting read-back returned nothing".to_string()))?;
    Ok(with_session(current.to_document(), executor.lease()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::result::QueryResult;
    use crate::core::session_manager::SessionManager;
    use crate::test_utils::MockExecutor;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(pool: MockExecutor) -> (Arc<MockExecutor>, ActionContext) {
        let pool = Arc::new(pool);
        let manager = Arc::new(SessionManager::new(pool.clone(), Duration::from_secs(60)));
        (pool.clone(), ActionContext::new(pool, manager))
    }

    #[tokio::test]
    async fn test_maintenance_is_write_gated() {
        let (pool, ctx) = context(MockExecutor::new());
        for action in [Action::Vacuum, Action::Analyze, Action::Reindex] {
            let err = maintenance(&ctx, &ActionRequest::new(action)).await.unwrap_err();
            assert_eq!(err.kind(), "access_denied");
        }
        assert!(pool.executed().is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_quotes_table() {
        let (pool, ctx) = context(MockExecutor::new());
        let mut request = ActionRequest::new(Action::Analyze).with_autocommit(true);
        request.table = Some("users".to_string());
        let out = maintenance(&ctx, &request).await.unwrap();
        assert_eq!(out["operation"], json!("analyze"));
        assert_eq!(pool.executed(), vec!["ANALYZE \"users\""]);

        request.table = Some("users\"; DROP TABLE x".to_string());
        assert_eq!(maintenance(&ctx, &request).await.unwrap_err().kind(), "validation_error");

        let mut vacuum = ActionRequest::new(Action::Vacuum).with_autocommit(true);
        vacuum.table = Some("users".to_string());
        assert_eq!(maintenance(&ctx, &vacuum).await.unwrap_err().kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_stats_counts_every_table() {
        let tables = QueryResult::from_rows(&["name", "type"], vec![vec![json!("a"), json!("table")]]);
        let counts = QueryResult::from_rows(&["row_count"], vec![vec![json!(3)]]);
        let pool = MockExecutor::new()
            .with_response("sqlite_master", tables)
            .with_response("count(*)", counts);
        let (_pool, ctx) = context(pool);

        let out = stats(&ctx, &ActionRequest::new(Action::Stats)).await.unwrap();
        assert_eq!(out, json!({ "tables": [{ "table": "a", "row_count": 3 }] }));
    }

    #[test]
    fn test_pragma_literals() {
        assert_eq!(pragma_literal(&json!(2000)).unwrap(), "2000");
        assert_eq!(pragma_literal(&json!(true)).unwrap(), "ON");
        assert_eq!(pragma_literal(&json!("wal")).unwrap(), "'wal'");
        assert!(pragma_literal(&json!("x'; DROP TABLE t; --")).is_err());
        assert!(pragma_literal(&json!([1])).is_err());
    }

    #[tokio::test]
    async fn test_settings_read_is_open_and_write_is_gated() {
        let (pool, ctx) = context(MockExecutor::new());
        let mut request = ActionRequest::new(Action::Settings);
        request.setting = Some("cache_size".to_string());
        settings(&ctx, &request).await.unwrap();
        assert_eq!(pool.executed(), vec!["PRAGMA cache_size"]);

        request.value = Some(json!(-4000));
        assert_eq!(settings(&ctx, &request).await.unwrap_err().kind(), "access_denied");

        let mut acting = ActionRequest::new(Action::Settings);
        acting.setting = Some("optimize".to_string());
        assert_eq!(settings(&ctx, &acting).await.unwrap_err().kind(), "access_denied");

        let request = request.with_autocommit(true);
        settings(&ctx, &request).await.unwrap();
        assert_eq!(
            pool.executed(),
            vec!["PRAGMA cache_size", "PRAGMA cache_size = -4000", "PRAGMA cache_size"]
        );
    }
}
