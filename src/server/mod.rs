//! Server core functionality
//!
//! The accept loop and the shared context handed to every connection.

pub mod context;
pub mod core;

pub use context::ServerContext;
pub use self::core::Server;
