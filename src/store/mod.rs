//! Credential store
//!
//! Identity records keyed by `(name, scope)` with their role grants.

pub mod credentials;
pub mod identity;

pub use credentials::CredentialStore;
pub use identity::{
    ADMIN_SCOPE, ANY_SCOPE, DigestOrigin, Identity, IdentityHandle, NewIdentity, Permission, Role,
    VerifierInput,
};
