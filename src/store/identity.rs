//! Identity records
//!
//! The persisted shape of an identity and its role grants.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::mechanism::Mechanism;

/// Role scope matching every scope.
pub const ANY_SCOPE: &str = "*";

/// Scope holding the administrative identity.
pub const ADMIN_SCOPE: &str = "admin";

/// Capability granted by a role.
///
/// `root` implies everything, `dbAdmin` implies `readWrite` which implies
/// `read`. `userAdmin` (creating and managing identities) implies only itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    Read,
    ReadWrite,
    DbAdmin,
    UserAdmin,
    Root,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::ReadWrite => "readWrite",
            Permission::DbAdmin => "dbAdmin",
            Permission::UserAdmin => "userAdmin",
            Permission::Root => "root",
        }
    }

    pub fn implies(self, other: Permission) -> bool {
        use Permission::*;
        match (self, other) {
            (Root, _) => true,
            (DbAdmin, DbAdmin | ReadWrite | Read) => true,
            (ReadWrite, ReadWrite | Read) => true,
            (Read, Read) => true,
            (UserAdmin, UserAdmin) => true,
            _ => false,
        }
    }
}

impl FromStr for Permission {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Permission::Read,
            Permission::ReadWrite,
            Permission::DbAdmin,
            Permission::UserAdmin,
            Permission::Root,
        ]
        .into_iter()
        .find(|p| p.as_str() == s)
        .ok_or_else(|| StoreError::InvalidRole(format!("unknown permission '{s}'")))
    }
}

/// A permission over a named scope. Serialized the way MongoDB writes role
/// grants: `{ "role": "readWrite", "db": "notes_system" }`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Role {
    #[serde(rename = "role")]
    pub permission: Permission,
    #[serde(rename = "db")]
    pub scope: String,
}

impl Role {
    pub fn new(permission: Permission, scope: impl Into<String>) -> Self {
        Self {
            permission,
            scope: scope.into(),
        }
    }

    /// Parses `permission@scope`.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        s.parse()
    }

    /// Whether holding `self` also grants `other`.
    pub fn covers(&self, other: &Role) -> bool {
        self.permission.implies(other.permission)
            && (self.scope == ANY_SCOPE || self.scope == other.scope)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.permission.as_str(), self.scope)
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (permission, scope) = s
            .split_once('@')
            .ok_or_else(|| StoreError::InvalidRole(format!("expected permission@scope, got '{s}'")))?;
        if scope.is_empty() {
            return Err(StoreError::InvalidRole(format!("empty scope in '{s}'")));
        }
        Ok(Role::new(permission.parse()?, scope))
    }
}

/// Where the password hash was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestOrigin {
    /// The store derived the verifier from a plaintext password.
    #[serde(rename = "server")]
    ServerComputed,
    /// The caller derived the verifier; the store never saw the password.
    #[serde(rename = "client")]
    ClientComputed,
}

/// Authentication material handed to the store at creation or password change.
pub enum VerifierInput {
    /// Plaintext password; derived and dropped inside the store.
    Plaintext(SecretString),
    /// Final verifier in text form, stored verbatim.
    Precomputed(String),
}

impl VerifierInput {
    pub fn digest_origin(&self) -> DigestOrigin {
        match self {
            VerifierInput::Plaintext(_) => DigestOrigin::ServerComputed,
            VerifierInput::Precomputed(_) => DigestOrigin::ClientComputed,
        }
    }
}

impl fmt::Debug for VerifierInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifierInput::Plaintext(_) => f.write_str("Plaintext([REDACTED])"),
            VerifierInput::Precomputed(_) => f.write_str("Precomputed([REDACTED])"),
        }
    }
}

/// Everything needed to create an identity.
#[derive(Debug)]
pub struct NewIdentity {
    pub name: String,
    pub scope: String,
    pub verifier: VerifierInput,
    pub mechanism: Mechanism,
    pub roles: BTreeSet<Role>,
}

/// A principal able to authenticate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub name: String,
    pub scope: String,
    pub verifier: String,
    pub mechanism: Mechanism,
    pub digest_origin: DigestOrigin,
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub administrative: bool,
}

impl Identity {
    pub fn handle(&self) -> IdentityHandle {
        IdentityHandle {
            id: self.id,
            name: self.name.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("mechanism", &self.mechanism)
            .field("digest_origin", &self.digest_origin)
            .field("roles", &self.roles)
            .field("administrative", &self.administrative)
            .finish_non_exhaustive()
    }
}

/// Public view of an identity. Never carries the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHandle {
    pub id: Uuid,
    pub name: String,
    pub scope: String,
}

impl fmt::Display for IdentityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.scope)
    }
}
