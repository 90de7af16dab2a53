//! Administrative sessions
//!
//! An `AdminSession` can only be obtained by authenticating as the
//! administrative identity. Every provisioning operation hangs off it, so there
//! is no way to create or change identities without having authenticated first.

use std::collections::BTreeSet;

use log::info;
use secrecy::SecretString;

use super::provisioner::Provisioner;
use crate::auth::AuthResult;
use crate::error::ProvisionError;
use crate::mechanism::{Mechanism, ScramVerifier};
use crate::store::{
    ADMIN_SCOPE, ANY_SCOPE, DigestOrigin, Identity, IdentityHandle, NewIdentity, Permission, Role,
    VerifierInput,
};

/// Credentials of the administrative identity.
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub name: String,
    pub password: SecretString,
}

/// Description of an identity to provision.
#[derive(Debug, Clone)]
pub struct IdentitySpec {
    pub name: String,
    pub password: SecretString,
    pub mechanism: Mechanism,
    /// `ClientComputed` derives the verifier on this side and hands the store
    /// only the result.
    pub digest_origin: DigestOrigin,
    pub roles: BTreeSet<Role>,
    pub scope: String,
}

pub struct AdminSession<'a> {
    provisioner: &'a Provisioner,
    admin: AuthResult,
}

impl<'a> AdminSession<'a> {
    pub(super) fn new(provisioner: &'a Provisioner, admin: AuthResult) -> Self {
        Self { provisioner, admin }
    }

    pub fn admin(&self) -> &IdentityHandle {
        &self.admin.identity
    }

    /// Creates a scoped identity with an explicit role set.
    pub fn provision_identity(&self, spec: IdentitySpec) -> Result<Identity, ProvisionError> {
        check_roles(&spec.roles, &spec.scope)?;
        self.authorize(&spec.scope, &spec.roles)?;

        let verifier = match spec.digest_origin {
            DigestOrigin::ServerComputed => VerifierInput::Plaintext(spec.password),
            DigestOrigin::ClientComputed => {
                let negotiator = self.provisioner.negotiator();
                let derived = ScramVerifier::generate(
                    spec.mechanism,
                    &spec.password,
                    negotiator.iterations(),
                    negotiator.rng(),
                )?;
                VerifierInput::Precomputed(derived.to_string())
            }
        };

        let identity = self.provisioner.store().create_identity(NewIdentity {
            name: spec.name,
            scope: spec.scope,
            verifier,
            mechanism: spec.mechanism,
            roles: spec.roles,
        })?;
        info!(
            "{} provisioned {} with roles {:?}",
            self.admin.identity,
            identity.handle(),
            identity.roles.iter().map(Role::to_string).collect::<Vec<_>>()
        );
        Ok(identity)
    }

    /// Removes an identity and ends its sessions.
    pub fn revoke_identity(&self, name: &str, scope: &str) -> Result<IdentityHandle, ProvisionError> {
        self.authorize(scope, &BTreeSet::new())?;
        let removed = self.provisioner.store().revoke(name, scope)?;
        let dropped = self.provisioner.sessions().revoke_identity(removed.id);
        info!(
            "{} revoked {} ({} sessions dropped)",
            self.admin.identity,
            removed.handle(),
            dropped
        );
        Ok(removed.handle())
    }

    /// Replaces an identity's roles. Existing sessions are dropped so the
    /// old grants stop working immediately.
    pub fn update_roles(
        &self,
        name: &str,
        scope: &str,
        roles: BTreeSet<Role>,
    ) -> Result<Identity, ProvisionError> {
        check_roles(&roles, scope)?;
        self.authorize(scope, &roles)?;
        let updated = self.provisioner.store().set_roles(name, scope, roles)?;
        self.provisioner.sessions().revoke_identity(updated.id);
        info!("{} updated roles of {}", self.admin.identity, updated.handle());
        Ok(updated)
    }

    /// The admin must manage identities in `scope` and hold every role it grants.
    fn authorize(&self, scope: &str, requested: &BTreeSet<Role>) -> Result<(), ProvisionError> {
        let held = &self.admin.effective_roles;
        let manage = Role::new(Permission::UserAdmin, scope);
        if !held.iter().any(|r| r.covers(&manage)) {
            return Err(ProvisionError::Unauthorized(format!(
                "{} cannot manage identities in {}",
                self.admin.identity, scope
            )));
        }
        if let Some(role) = requested.iter().find(|want| !held.iter().any(|r| r.covers(want))) {
            return Err(ProvisionError::Unauthorized(format!(
                "{} cannot grant {}",
                self.admin.identity, role
            )));
        }
        Ok(())
    }
}

fn check_roles(roles: &BTreeSet<Role>, scope: &str) -> Result<(), ProvisionError> {
    if scope == ADMIN_SCOPE || scope == ANY_SCOPE {
        return Err(ProvisionError::InvalidSpec(format!("scope '{scope}' is reserved")));
    }
    if roles.is_empty() {
        return Err(ProvisionError::InvalidSpec("role set is empty".into()));
    }
    if let Some(role) = roles.iter().find(|r| r.scope != scope) {
        return Err(ProvisionError::InvalidSpec(format!(
            "role {role} is outside scope {scope}"
        )));
    }
    Ok(())
}
