//! Email confirmation HTTP handlers.

pub mod confirm;

pub use confirm::{CONFIRM_KEY_PATH, EmailConfirmResponse, confirm_get, confirm_routes};
