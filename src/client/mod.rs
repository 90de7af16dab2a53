//! Client management system
//!
//! Handles client connections and per-connection authentication state.

pub mod handler;
pub mod registry;
pub mod state;

pub use handler::handle_client;
pub use registry::ClientRegistry;
pub use state::{AuthState, Client};
