//! ColdQuery: a session-aware SQL execution service over SQLite.
//!
//! Requests name an action; writes are denied unless they run inside a
//! session-bound transaction or explicitly opt into autocommit.

// Core infrastructure modules
pub mod config;
pub mod core;

// Request handling
pub mod actions;
pub mod security;
pub mod server;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
