/// Write Policy
///
/// Writes are denied unless the caller either works inside a session or
/// explicitly acknowledges immediate, non-revertible execution with
/// `autocommit = true`.
use crate::core::{ColdQueryError, Result};

/// Whether a write may proceed. Pure; no side effects.
pub fn is_write_allowed(session_id: Option<&str>, autocommit: Option<bool>) -> bool {
    session_id.map_or(false, |id| !id.is_empty()) || autocommit == Some(true)
}

/// Fails with AccessDenied unless the write is allowed.
pub fn allow_write(session_id: Option<&str>, autocommit: Option<bool>) -> Result<()> {
    if is_write_allowed(session_id, autocommit) {
        Ok(())
    } else {
        Err(ColdQueryError::AccessDenied(
            "write operations require an active 'session_id' (begin a transaction first) \
             or 'autocommit: true' for immediate execution"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_policy_truth_table() {
        assert!(is_write_allowed(Some("abc"), None));
        assert!(is_write_allowed(Some("abc"), Some(false)));
        assert!(is_write_allowed(None, Some(true)));
        assert!(is_write_allowed(Some(""), Some(true)));

        assert!(!is_write_allowed(None, None));
        assert!(!is_write_allowed(None, Some(false)));
        assert!(!is_write_allowed(Some(""), None));
        assert!(!is_write_allowed(Some(""), Some(false)));
    }

    #[test]
    fn test_denial_is_access_denied() {
        let err = allow_write(None, Some(false)).unwrap_err();
        assert_eq!(err.kind(), "access_denied");
        assert!(err.to_string().contains("autocommit"));
        assert!(allow_write(Some("s"), None).is_ok());
    }
}
