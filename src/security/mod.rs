/// Request gating: the default-deny write policy and the optional
/// shared-secret unlock.
pub mod access_control;
pub mod auth;

pub use access_control::{allow_write, is_write_allowed};
pub use auth::AuthGate;
