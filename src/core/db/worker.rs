/// Blocking Worker
///
/// SQLite calls block, so they run on tokio's blocking pool. The connection
/// travels into the worker and back out again; if a deadline is set and
/// expires, the statement is interrupted through the connection's interrupt
/// handle and the worker is still awaited so the connection is never lost.
use crate::core::{ColdQueryError, Result};
use rusqlite::Connection;
use std::ops::Deref;
use std::time::Duration;
use tracing::{error, warn};

/// Runs `work` against `conn` on the blocking pool.
///
/// Returns the connection (unless the worker panicked, in which case it was
/// dropped during unwinding) together with the outcome.
pub(crate) async fn run_blocking<C, T, F>(conn: C, deadline: Option<Duration>, work: F) -> (Option<C>, Result<T>)
where
    C: Deref<Target = Connection> + Send + 'static,
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let interrupt = conn.get_interrupt_handle();
    let mut task = tokio::task::spawn_blocking(move || {
        let outcome = work(&*conn);
        (conn, outcome)
    });

    let joined = match deadline {
        None => task.await,
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(deadline_ms = limit.as_millis() as u64, "statement deadline expired, interrupting");
                interrupt.interrupt();
                return match task.await {
                    // finished on its own while the interrupt was on its way
                    Ok((conn, Ok(value))) => (Some(conn), Ok(value)),
                    Ok((conn, Err(_))) => (
                        Some(conn),
                        Err(ColdQueryError::Timeout(format!(
                            "statement exceeded its {} ms deadline and was interrupted",
                            limit.as_millis()
                        ))),
                    ),
                    Err(e) => worker_failed(e),
                };
            }
        },
    };

    match joined {
        Ok((conn, outcome)) => (Some(conn), outcome),
        Err(e) => worker_failed(e),
    }
}

fn worker_failed<C, T>(e: tokio::task::JoinError) -> (Option<C>, Result<T>) {
    error!(error = %e, "statement worker failed");
    (None, Err(ColdQueryError::Internal(format!("statement worker failed: {}", e))))
}
