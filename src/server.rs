/// JSON-lines Transport
///
/// One request object per input line, one response frame per output line,
/// processed in order. Each transport connection gets its own auth gate.
use crate::actions::{dispatch, ActionRequest};
use crate::config::AuthConfig;
use crate::core::{ActionContext, ColdQueryError, Result};
use crate::security::AuthGate;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

pub struct Server {
    ctx: ActionContext,
    auth: AuthConfig,
}

impl Server {
    pub fn new(ctx: ActionContext, auth: AuthConfig) -> Self {
        Server { ctx, auth }
    }

    pub fn context(&self) -> &ActionContext {
        &self.ctx
    }

    /// Auth state for a new transport connection.
    pub fn new_gate(&self) -> Result<AuthGate> {
        AuthGate::from_config(&self.auth)
    }

    /// Handles one request line and builds its response frame.
    ///
    /// Never fails: every problem becomes an error frame.
    pub async fn handle_line(&self, gate: &AuthGate, line: &str) -> Value {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                return error_frame(
                    Value::Null,
                    &ColdQueryError::Validation(format!("malformed request: {}", e)),
                )
            }
        };
        let id = raw.get("id").cloned().unwrap_or(Value::Null);
        let request: ActionRequest = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => return error_frame(id, &ColdQueryError::Validation(format!("invalid request: {}", e))),
        };

        match dispatch(&self.ctx, gate, &request).await {
            Ok(result) => json!({ "id": id, "ok": true, "result": result }),
            Err(e) => {
                match &e {
                    ColdQueryError::Internal(detail) => {
                        error!(action = request.action.name(), detail = %detail, "internal error")
                    }
                    other => debug!(action = request.action.name(), error = %other, "action failed"),
                }
                error_frame(id, &e)
            }
        }
    }

    /// Serves one transport connection until its input closes.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let gate = self.new_gate()?;
        let mut lines = BufReader::new(reader).lines();
        info!(auth = gate.is_enabled(), "serving requests");

        while let Some(line) = lines.next_line().await.map_err(io_error)? {
            if line.trim().is_empty() {
                continue;
            }
            let frame = self.handle_line(&gate, &line).await;
            let mut encoded = serde_json::to_string(&frame)
                .map_err(|e| ColdQueryError::Internal(format!("failed to encode response: {}", e)))?;
            encoded.push('\n');
            writer.write_all(encoded.as_bytes()).await.map_err(io_error)?;
            writer.flush().await.map_err(io_error)?;
        }
        info!("input closed");
        Ok(())
    }
}

fn error_frame(id: Value, error: &ColdQueryError) -> Value {
    json!({ "id": id, "ok": false, "error": error.to_document() })
}

fn io_error(e: std::io::Error) -> ColdQueryError {
    ColdQueryError::Internal(format!("transport I/O failed: {}", e))
}
