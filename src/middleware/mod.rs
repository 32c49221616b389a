mod auth;
mod error_handler;

pub use auth::{Identity, identify, require_admin};
pub use error_handler::log_errors;
