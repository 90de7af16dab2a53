//! ns-auth server
//!
//! Credential issuance and scoped access control for the notes system: a
//! credential store, SCRAM mechanism negotiation, administrative provisioning
//! and a line-protocol server for sign-up and login.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod mechanism;
pub mod middleware;
pub mod protocol;
pub mod provision;
pub mod server;
pub mod session;
pub mod store;

pub use server::{Server, ServerContext};
