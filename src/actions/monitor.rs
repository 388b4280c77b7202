/// Monitoring actions: health, database size and pool status
use crate::actions::ActionRequest;
use crate::core::executor::{PooledExecutor, QueryExecutor};
use crate::core::{ActionContext, ColdQueryError, Result};
use serde_json::{json, Value};
use tracing::error;

/// Round-trips a trivial query through the pool.
pub async fn health(ctx: &ActionContext, _request: &ActionRequest) -> Result<Value> {
    ctx.executor()
        .execute("SELECT 1 AS health_check", &[], None)
        .await
        .map_err(|e| {
            error!(error = %e, "health check failed");
            e
        })?;
    Ok(json!({ "status": "ok" }))
}

pub async fn size(ctx: &ActionContext, _request: &ActionRequest) -> Result<Value> {
    let result = ctx
        .executor()
        .execute(
            "SELECT page_count, page_size, page_count * page_size AS bytes \
             FROM pragma_page_count(), pragma_page_size()",
            &[],
            None,
        )
        .await?;
    let row = result
        .rows()
        .first()
        .ok_or_else(|| ColdQueryError::Internal("page statistics returned no row".to_string()))?;
    Ok(json!({
        "page_count": row.get("page_count").cloned().unwrap_or(Value::Null),
        "page_size": row.get("page_size").cloned().unwrap_or(Value::Null),
        "bytes": row.get("bytes").cloned().unwrap_or(Value::Null),
    }))
}

pub async fn pool(ctx: &ActionContext, _request: &ActionRequest) -> Result<Value> {
    let manager = ctx.session_manager();
    Ok(json!({
        "pool": ctx.executor().status(),
        "sessions": {
            "live": manager.live_count(),
            "ttl_seconds": manager.ttl().as_secs(),
        },
    }))
}
