//! Authenticated sessions
//!
//! Bearer tokens with explicit expiry.

pub mod manager;

pub use manager::{Session, SessionManager};
