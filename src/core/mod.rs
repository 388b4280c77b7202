/// Core Module for ColdQuery
///
/// Executors, sessions and the shared error type. The action layer and the
/// server only talk to the database through what this module exposes.
pub mod context;
pub mod db;
pub mod error;
pub mod executor;
pub mod session_manager;

// Re-export commonly used types for convenience
pub use context::ActionContext;
pub use error::{ColdQueryError, ErrorDocument, Result};
