/// Shared-Secret Unlock
///
/// When enabled, a transport connection starts locked and only `health` and
/// `auth_unlock` are served until the configured token is presented.
use crate::config::AuthConfig;
use crate::core::{ColdQueryError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Per-connection unlock state.
#[derive(Debug)]
pub struct AuthGate {
    token: Option<String>,
    unlocked: AtomicBool,
}

impl AuthGate {
    /// A gate that is open from the start.
    pub fn disabled() -> Self {
        AuthGate {
            token: None,
            unlocked: AtomicBool::new(true),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        match config.token.as_deref() {
            Some(token) if !token.is_empty() => Ok(AuthGate {
                token: Some(token.to_string()),
                unlocked: AtomicBool::new(false),
            }),
            _ => Err(ColdQueryError::Config(
                "authentication is enabled but no token is configured".to_string(),
            )),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Fails with AuthRequired while the gate is locked.
    pub fn check(&self) -> Result<()> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(ColdQueryError::AuthRequired(
                "authentication required; call 'auth_unlock' with the server token".to_string(),
            ))
        }
    }

    /// Unlocks the gate if `candidate` matches the configured token.
    pub fn unlock(&self, candidate: Option<&str>) -> Result<()> {
        let Some(expected) = self.token.as_deref() else {
            return Ok(());
        };
        let candidate = candidate.ok_or_else(|| ColdQueryError::Validation("'token' is required".to_string()))?;
        if constant_time_eq(expected.as_bytes(), candidate.as_bytes()) {
            self.unlocked.store(true, Ordering::SeqCst);
            info!("connection unlocked");
            Ok(())
        } else {
            warn!("rejected auth_unlock with an invalid token");
            Err(ColdQueryError::AuthRequired("invalid token".to_string()))
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
