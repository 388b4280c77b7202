/// Query actions: read, write, explain and multi-statement transaction.
use crate::actions::{with_session, ActionRequest};
use crate::core::db::query::is_write_statement;
use crate::core::executor::{PooledExecutor, QueryExecutor};
use crate::core::{ActionContext, ColdQueryError, Result};
use crate::security::allow_write;
use serde_json::{json, Value};

/// Runs a query. A write-class statement sent through `read` still has to
/// pass the write gate.
pub async fn read(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let sql = request.require_sql()?;
    if is_write_statement(sql) {
        allow_write(request.session_id(), request.autocommit)?;
    }
    let executor = ctx.resolve_executor(request.session_id())?;
    let result = executor.execute(sql, &request.params, request.timeout()).await?;
    Ok(with_session(result.to_document(), executor.lease()))
}

pub async fn write(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let sql = request.require_sql()?;
    allow_write(request.session_id(), request.autocommit)?;
    let executor = ctx.resolve_executor(request.session_id())?;
    let result = executor.execute(sql, &request.params, request.timeout()).await?;
    Ok(with_session(result.to_document(), executor.lease()))
}

/// Returns the query plan without running the statement.
pub async fn explain(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let sql = request.require_sql()?;
    if request.analyze == Some(true) {
        return Err(ColdQueryError::Validation(
            "analyze is not supported: the engine can only plan a statement, not profile it".to_string(),
        ));
    }
    let executor = ctx.resolve_executor(request.session_id())?;
    let plan = format!("EXPLAIN QUERY PLAN {}", sql);
    let result = executor.execute(&plan, &request.params, request.timeout()).await?;
    Ok(with_session(result.to_document(), executor.lease()))
}

/// Runs several statements as one unit.
///
/// Inside a session they run in order on the session's transaction; a failure
/// leaves earlier statements in place for the caller to commit or roll back.
/// Without a session they run as one atomic batch on a pooled connection.
pub async fn transaction(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    if request.operations.is_empty() {
        return Err(request.missing("operations"));
    }
    allow_write(request.session_id(), request.autocommit)?;

    let executor = ctx.resolve_executor(request.session_id())?;
    let results = match executor.lease() {
        Some(lease) => {
            let mut results = Vec::with_capacity(request.operations.len());
            for op in &request.operations {
                let result = lease.executor().execute(&op.sql, &op.params, request.timeout()).await?;
                results.push(result.to_document());
            }
            results
        }
        None => ctx
            .executor()
            .execute_batch(&request.operations, request.timeout())
            .await?
            .iter()
            .map(|r| r.to_document())
            .collect(),
    };
    Ok(with_session(json!({ "results": results }), executor.lease()))
}
