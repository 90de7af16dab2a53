//! Authentication system
//!
//! Sign-up, login and password changes for external callers.

pub mod results;
pub mod service;
pub mod validator;

pub use results::AuthResult;
pub use service::{AuthenticatorService, default_roles};
