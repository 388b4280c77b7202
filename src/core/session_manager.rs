/// Session Manager
///
/// Registry of session ids to their session-bound executors. Registration,
/// deregistration, lease acquisition and the reaper's scan-and-evict all go
/// through one registry lock, so a session in use is never reaped and an id
/// is never handed out twice.
use crate::core::db::transaction::TransactionState;
use crate::core::executor::{PooledExecutor, SessionExecutor};
use crate::core::{ColdQueryError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a session is ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Commit,
    Rollback,
}

/// One live session.
pub struct Session {
    id: String,
    executor: Arc<dyn SessionExecutor>,
    created_at: DateTime<Utc>,
    last_touched: Mutex<Instant>,
    in_flight: AtomicUsize,
    ttl: Duration,
}

impl Session {
    fn new(id: String, executor: Arc<dyn SessionExecutor>, ttl: Duration) -> Self {
        Session {
            id,
            executor,
            created_at: Utc::now(),
            last_touched: Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
            ttl,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn executor(&self) -> &Arc<dyn SessionExecutor> {
        &self.executor
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_touched.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle(&self, now: Instant) -> Duration {
        self.last_touched
            .lock()
            .map(|last| now.saturating_duration_since(*last))
            .unwrap_or_default()
    }

    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.ttl.saturating_sub(self.idle(now))
    }

    fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    fn is_evictable(&self, now: Instant) -> bool {
        !self.is_busy() && (self.idle(now) > self.ttl || self.executor.state().is_terminal())
    }
}

/// Exclusive use of a session for the duration of one operation.
///
/// While a lease is alive the reaper skips the session. Dropping the lease
/// touches the session, so its idle clock restarts after the operation.
pub struct SessionLease {
    session: Arc<Session>,
}

impl SessionLease {
    pub fn id(&self) -> &str {
        self.session.id()
    }

    pub fn executor(&self) -> &Arc<dyn SessionExecutor> {
        self.session.executor()
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.session.remaining_ttl(Instant::now())
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.session.touch();
        self.session.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot entry returned by `list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: String,
    pub idle_seconds: u64,
    pub remaining_ttl_seconds: u64,
    pub state: TransactionState,
    pub savepoints: Vec<String>,
}

#[derive(Default)]
struct Registry {
    live: HashMap<String, Arc<Session>>,
    /// Every id that was ever registered and has since ended
    retired: HashSet<String>,
}

impl Registry {
    fn not_found(&self, id: &str) -> ColdQueryError {
        if self.retired.contains(id) {
            ColdQueryError::SessionNotFound(format!("session '{}' has ended; begin a new transaction", id))
        } else {
            ColdQueryError::SessionNotFound(format!("session '{}' does not exist", id))
        }
    }

    fn retire(&mut self, id: &str) -> Option<Arc<Session>> {
        let session = self.live.remove(id)?;
        self.retired.insert(id.to_string());
        Some(session)
    }
}

pub struct SessionManager {
    pool: Arc<dyn PooledExecutor>,
    ttl: Duration,
    registry: Mutex<Registry>,
    shutdown_token: CancellationToken,
}

impl SessionManager {
    pub fn new(pool: Arc<dyn PooledExecutor>, ttl: Duration) -> Self {
        SessionManager {
            pool,
            ttl,
            registry: Mutex::new(Registry::default()),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock_registry(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| ColdQueryError::Internal("Failed to acquire session registry lock".to_string()))
    }

    /// Opens a transaction on a dedicated connection and registers it.
    pub async fn begin(&self) -> Result<String> {
        if self.shutdown_token.is_cancelled() {
            return Err(ColdQueryError::SessionClosed(
                "session manager is shutting down".to_string(),
            ));
        }
        let executor = self.pool.create_session().await?;

        let mut registry = self.lock_registry()?;
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !registry.live.contains_key(&candidate) && !registry.retired.contains(&candidate) {
                break candidate;
            }
        };
        registry
            .live
            .insert(id.clone(), Arc::new(Session::new(id.clone(), executor, self.ttl)));
        info!(session_id = %id, live = registry.live.len(), "session started");
        Ok(id)
    }

    /// Looks up a live session and leases it for one operation.
    pub fn resolve(&self, id: &str) -> Result<SessionLease> {
        let mut registry = self.lock_registry()?;
        let session = match registry.live.get(id) {
            Some(session) => Arc::clone(session),
            None => return Err(registry.not_found(id)),
        };
        if session.executor.state().is_terminal() {
            registry.retire(id);
            debug!(session_id = %id, "dropped session whose transaction already ended");
            return Err(registry.not_found(id));
        }
        session.in_flight.fetch_add(1, Ordering::SeqCst);
        session.touch();
        Ok(SessionLease { session })
    }

    /// Restarts a session's idle clock.
    pub fn touch(&self, id: &str) -> Result<()> {
        let registry = self.lock_registry()?;
        match registry.live.get(id) {
            Some(session) => {
                session.touch();
                Ok(())
            }
            None => Err(registry.not_found(id)),
        }
    }

    /// Commits or rolls back a session and deregisters it.
    ///
    /// The id is retired before the terminal statement runs, so no other
    /// caller can lease the session while it is ending.
    pub async fn end(&self, id: &str, how: SessionEnd) -> Result<()> {
        let session = {
            let mut registry = self.lock_registry()?;
            match registry.retire(id) {
                Some(session) => session,
                None => return Err(registry.not_found(id)),
            }
        };

        let outcome = match how {
            SessionEnd::Commit => session.executor.commit().await,
            SessionEnd::Rollback => session.executor.rollback().await,
        };
        match outcome {
            Ok(()) => {
                info!(session_id = %id, ?how, "session ended");
                Ok(())
            }
            Err(ColdQueryError::SessionClosed(message)) => Err(ColdQueryError::SessionNotFound(format!(
                "session '{}' has ended: {}",
                id, message
            ))),
            Err(e) => {
                warn!(session_id = %id, ?how, error = %e, "session ended with an error");
                Err(e)
            }
        }
    }

    /// Read-only snapshot of the live sessions.
    pub fn list(&self) -> Result<Vec<SessionInfo>> {
        let now = Instant::now();
        let registry = self.lock_registry()?;
        let mut sessions: Vec<SessionInfo> = registry
            .live
            .values()
            .map(|session| SessionInfo {
                id: session.id.clone(),
                created_at: session.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                idle_seconds: session.idle(now).as_secs(),
                remaining_ttl_seconds: session.remaining_ttl(now).as_secs(),
                state: session.executor.state(),
                savepoints: session.executor.savepoints(),
            })
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    pub fn live_count(&self) -> usize {
        self.registry.lock().map(|r| r.live.len()).unwrap_or(0)
    }

    /// One reaper pass: evicts and rolls back every idle-expired session that
    /// has no operation in flight. Returns the number evicted.
    pub async fn reap_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let expired: Vec<Arc<Session>> = {
            let mut registry = self.lock_registry()?;
            let ids: Vec<String> = registry
                .live
                .values()
                .filter(|session| session.is_evictable(now))
                .map(|session| session.id.clone())
                .collect();
            ids.iter().filter_map(|id| registry.retire(id)).collect()
        };

        for session in &expired {
            warn!(
                session_id = %session.id,
                idle_secs = session.idle(now).as_secs(),
                "session expired; rolling back"
            );
            match session.executor.rollback().await {
                Ok(()) | Err(ColdQueryError::SessionClosed(_)) => {}
                Err(e) => error!(session_id = %session.id, error = %e, "rollback of expired session failed"),
            }
        }
        Ok(expired.len())
    }

    /// Starts the background reaper. It stops on `shutdown` or when the
    /// manager is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let token = self.shutdown_token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("session reaper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else { break };
                        match manager.reap_expired().await {
                            Ok(0) => {}
                            Ok(evicted) => info!(evicted, "reaper pass complete"),
                            Err(e) => error!(error = %e, "reaper pass failed"),
                        }
                    }
                }
            }
        })
    }

    /// Stops the reaper and rolls back every live session.
    pub async fn shutdown(&self) -> Result<usize> {
        self.shutdown_token.cancel();
        let sessions: Vec<Arc<Session>> = {
            let mut registry = self.lock_registry()?;
            let ids: Vec<String> = registry.live.keys().cloned().collect();
            ids.iter().filter_map(|id| registry.retire(id)).collect()
        };
        for session in &sessions {
            if let Err(e) = session.executor.rollback().await {
                debug!(session_id = %session.id, error = %e, "rollback during shutdown failed");
            }
        }
        info!(rolled_back = sessions.len(), "session manager shut down");
        Ok(sessions.len())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
