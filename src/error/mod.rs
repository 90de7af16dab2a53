//! Error handling
//!
//! Defines error types and their mapping to caller-visible codes.

pub mod handlers;
pub mod types;

pub use handlers::{ApiError, ErrorKind};
pub use types::*;
