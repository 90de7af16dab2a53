//! Deployment bootstrap
//!
//! Installs the administrative identity when the store has none, then
//! provisions the configured application identity through an admin session.

use log::{info, warn};

use super::admin::{AdminCredentials, IdentitySpec};
use super::provisioner::Provisioner;
use crate::config::{BootstrapConfig, StartupConfig};
use crate::error::{ProvisionError, ServerError};
use crate::store::{CredentialStore, IdentityHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Provisioned(IdentityHandle),
    /// The identity already existed; nothing was overwritten.
    AlreadyProvisioned { name: String, scope: String },
    /// No `[bootstrap]` table configured.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub admin_installed: bool,
    pub outcome: ProvisionOutcome,
}

/// Runs the deployment bootstrap. Safe to call on every start.
pub fn run_bootstrap(
    store: &CredentialStore,
    provisioner: &Provisioner,
    config: &StartupConfig,
    bootstrap: Option<&BootstrapConfig>,
) -> Result<BootstrapReport, ServerError> {
    let mut admin_installed = false;
    if store.admin().is_none() {
        match &config.admin_password {
            Some(password) => {
                store.install_admin(&config.admin_user, password.clone(), config.mechanism()?)?;
                info!("Installed administrative identity {}", config.admin_user);
                admin_installed = true;
            }
            None => warn!("No administrative identity installed and no admin_password configured"),
        }
    }

    let Some(bootstrap) = bootstrap else {
        return Ok(BootstrapReport {
            admin_installed,
            outcome: ProvisionOutcome::Skipped,
        });
    };

    let password = config.admin_password.clone().ok_or_else(|| {
        ProvisionError::Unauthorized("admin_password is required to run the bootstrap".into())
    })?;
    let credentials = AdminCredentials {
        name: config.admin_user.clone(),
        password,
    };
    let spec = IdentitySpec {
        name: bootstrap.name.clone(),
        password: bootstrap.password.clone(),
        mechanism: bootstrap.mechanism()?,
        digest_origin: bootstrap.digest_origin,
        roles: bootstrap.roles()?.into_iter().collect(),
        scope: bootstrap.scope.clone(),
    };

    let outcome = match provisioner.bootstrap(&credentials, spec) {
        Ok(identity) => ProvisionOutcome::Provisioned(identity.handle()),
        Err(ProvisionError::DuplicateIdentity { name, scope }) => {
            info!("Bootstrap identity {}@{} already provisioned", name, scope);
            ProvisionOutcome::AlreadyProvisioned { name, scope }
        }
        Err(e) => return Err(e.into()),
    };

    Ok(BootstrapReport {
        admin_installed,
        outcome,
    })
}
