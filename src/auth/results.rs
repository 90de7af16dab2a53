//! Authentication result types
//!
//! Defines result structures returned by authentication operations.

use std::collections::BTreeSet;

use crate::store::{IdentityHandle, Permission, Role};

/// Outcome of a successful authentication. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub identity: IdentityHandle,
    pub granted: bool,
    pub effective_roles: BTreeSet<Role>,
}

impl AuthResult {
    /// Whether any effective role grants `permission` over `scope`.
    pub fn allows(&self, permission: Permission, scope: &str) -> bool {
        let wanted = Role::new(permission, scope);
        self.granted && self.effective_roles.iter().any(|r| r.covers(&wanted))
    }

    /// Roles in `permission@scope` text form.
    pub fn role_names(&self) -> Vec<String> {
        self.effective_roles.iter().map(Role::to_string).collect()
    }
}
