/// Transaction lifecycle actions
use crate::actions::{with_session, ActionRequest};
use crate::core::executor::SessionExecutor;
use crate::core::session_manager::SessionEnd;
use crate::core::{ActionContext, Result};
use serde_json::{json, Value};

pub async fn begin(ctx: &ActionContext, _request: &ActionRequest) -> Result<Value> {
    let manager = ctx.session_manager();
    let session_id = manager.begin().await?;
    Ok(json!({
        "status": "transaction started",
        "session_id": session_id,
        "expires_in_seconds": manager.ttl().as_secs(),
    }))
}

pub async fn commit(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let session_id = request.require_session()?;
    ctx.session_manager().end(session_id, SessionEnd::Commit).await?;
    Ok(json!({ "status": "transaction committed", "session_id": session_id }))
}

pub async fn rollback(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let session_id = request.require_session()?;
    ctx.session_manager().end(session_id, SessionEnd::Rollback).await?;
    Ok(json!({ "status": "transaction rolled back", "session_id": session_id }))
}

pub async fn savepoint(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let session_id = request.require_session()?;
    let name = request.require_name()?;
    let lease = ctx.session_manager().resolve(session_id)?;
    lease.executor().savepoint(name).await?;
    let document = json!({
        "status": "savepoint created",
        "name": name,
        "savepoints": lease.executor().savepoints(),
    });
    Ok(with_session(document, Some(&lease)))
}

pub async fn release(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let session_id = request.require_session()?;
    let name = request.require_name()?;
    let lease = ctx.session_manager().resolve(session_id)?;
    lease.executor().release(name).await?;
    let document = json!({
        "status": "savepoint released",
        "name": name,
        "savepoints": lease.executor().savepoints(),
    });
    Ok(with_session(document, Some(&lease)))
}

pub async fn rollback_to(ctx: &ActionContext, request: &ActionRequest) -> Result<Value> {
    let session_id = request.require_session()?;
    let name = request.require_name()?;
    let lease = ctx.session_manager().resolve(session_id)?;
    lease.executor().rollback_to(name).await?;
    let document = json!({
        "status": "rolled back to savepoint",
        "name": name,
        "savepoints": lease.executor().savepoints(),
    });
    Ok(with_session(document, Some(&lease)))
}

pub async fn list_sessions(ctx: &ActionContext, _request: &ActionRequest) -> Result<Value> {
    let sessions = ctx.session_manager().list()?;
    Ok(json!({ "sessions": sessions }))
}
