//! Access provisioning
//!
//! Administrative creation, revocation and role changes of scoped identities.

pub mod admin;
pub mod bootstrap;
pub mod provisioner;

pub use admin::{AdminCredentials, AdminSession, IdentitySpec};
pub use bootstrap::{BootstrapReport, ProvisionOutcome, run_bootstrap};
pub use provisioner::Provisioner;
