/// Schema actions: catalog listing and table description
use crate::actions::{with_session, ActionRequest};
use crate::core::db::query::validate_identifier;
use crate::core::db::schema::{describe_table, list_objects, ObjectKind, DEFAULT_LIST_LIMIT};
use crate::core::{ActionContext, ColdQueryError, Result};
use serde_json::Value;

pub async fn list(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let kind = ObjectKind::parse(request.target.as_deref())?;
    let executor = ctx.resolve_executor(request.session_id())?;
    let limit = request.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = request.offset.unwrap_or(0);
    let result = list_objects(&executor, kind, limit, offset).await?;
    Ok(with_session(result.to_document(), executor.lease()))
}

pub async fn describe(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let table = request
        .table
        .as_deref()
        .ok_or_else(|| request.missing("table"))?;
    validate_identifier("table", table)?;
    let executor = ctx.resolve_executor(request.session_id())?;
    let description = describe_table(&executor, table).await?;
    let document = serde_json::to_value(description)
        .map_err(|e| ColdQueryError::Internal(format!("failed to serialize table description: {}", e)))?;
    Ok(with_session(document, executor.lease()))
}
