//! Access provisioner
//!
//! Authenticates the administrative identity and hands out `AdminSession`s.

use std::sync::Arc;

use log::warn;

use super::admin::{AdminCredentials, AdminSession, IdentitySpec};
use crate::auth::AuthResult;
use crate::error::ProvisionError;
use crate::mechanism::Negotiator;
use crate::session::SessionManager;
use crate::store::{ADMIN_SCOPE, CredentialStore, Identity};

pub struct Provisioner {
    store: Arc<CredentialStore>,
    negotiator: Arc<Negotiator>,
    sessions: Arc<SessionManager>,
}

impl Provisioner {
    pub fn new(
        store: Arc<CredentialStore>,
        negotiator: Arc<Negotiator>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            store,
            negotiator,
            sessions,
        }
    }

    /// Runs the mechanism exchange against the administrative identity.
    pub fn authenticate(&self, credentials: &AdminCredentials) -> Result<AdminSession<'_>, ProvisionError> {
        let admin = self
            .store
            .lookup(&credentials.name, ADMIN_SCOPE)
            .ok()
            .filter(|identity| identity.administrative);
        let verified = self.negotiator.authenticate_password(
            admin.as_ref(),
            &credentials.name,
            ADMIN_SCOPE,
            &credentials.password,
        )?;

        match admin {
            Some(admin) if verified => Ok(AdminSession::new(
                self,
                AuthResult {
                    identity: admin.handle(),
                    granted: true,
                    effective_roles: admin.roles,
                },
            )),
            _ => {
                warn!("Administrative authentication failed for {}", credentials.name);
                Err(ProvisionError::Unauthorized(
                    "administrative authentication failed".into(),
                ))
            }
        }
    }

    /// Authenticates and provisions in one step.
    pub fn bootstrap(
        &self,
        credentials: &AdminCredentials,
        spec: IdentitySpec,
    ) -> Result<Identity, ProvisionError> {
        self.authenticate(credentials)?.provision_identity(spec)
    }

    pub(super) fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub(super) fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub(super) fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}
