/// ColdQuery Error Module
///
/// This module defines the error taxonomy shared by the executors, the session
/// manager and the action layer. Every variant maps to a stable `kind` string
/// so errors can cross the protocol boundary as structured documents.
use serde::Serialize;
use thiserror::Error;

/// Error type for every fallible operation in ColdQuery.
///
/// The variants follow how a caller is expected to react:
/// - input and policy problems (`Validation`, `AccessDenied`, `AuthRequired`)
/// - session lifecycle problems (`SessionNotFound`, `SessionClosed`)
/// - engine rejections (`Statement`), never retried automatically
/// - resource exhaustion (`Timeout`), retryable at the caller's discretion
/// - startup and unexpected faults (`Config`, `Internal`)
#[derive(Error, Debug)]
pub enum ColdQueryError {
    /// Missing or malformed request input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Write attempted without a session or an autocommit acknowledgment
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Shared-secret gate is enabled and has not been unlocked
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Session identifier absent, expired or already ended
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Call issued against an executor whose transaction already ended
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// The database engine rejected the statement
    #[error("Statement error: {0}")]
    Statement(#[from] rusqlite::Error),

    /// No connection within the checkout window, or a statement deadline expired
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything unexpected; logged and reported generically
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ColdQueryError {
    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            ColdQueryError::Validation(_) => "validation_error",
            ColdQueryError::AccessDenied(_) => "access_denied",
            ColdQueryError::AuthRequired(_) => "auth_required",
            ColdQueryError::SessionNotFound(_) => "session_not_found",
            ColdQueryError::SessionClosed(_) => "session_closed",
            ColdQueryError::Statement(_) => "statement_error",
            ColdQueryError::Timeout(_) => "timeout",
            ColdQueryError::Config(_) => "config_error",
            ColdQueryError::Internal(_) => "internal_error",
        }
    }

    /// Converts the error into the document sent back to the caller.
    ///
    /// Internal faults keep their detail in the logs only.
    pub fn to_document(&self) -> ErrorDocument {
        let message = match self {
            ColdQueryError::Internal(_) => "internal error, see server logs".to_string(),
            ColdQueryError::Statement(e) => e.to_string(),
            ColdQueryError::Validation(m)
            | ColdQueryError::AccessDenied(m)
            | ColdQueryError::AuthRequired(m)
            | ColdQueryError::SessionNotFound(m)
            | ColdQueryError::SessionClosed(m)
            | ColdQueryError::Timeout(m)
            | ColdQueryError::Config(m) => m.clone(),
        };
        ErrorDocument {
            kind: self.kind(),
            message,
        }
    }
}

/// Structured error as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDocument {
    pub kind: &'static str,
    pub message: String,
}

/// Type alias for Result to use ColdQueryError as the error type.
pub type Result<T> = std::result::Result<T, ColdQueryError>;
