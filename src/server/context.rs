//! Server context
//!
//! Everything a connection needs, built once at startup and shared by `Arc`.

use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use crate::api::ClientApi;
use crate::auth::AuthenticatorService;
use crate::config::{BootstrapConfig, SharedRuntimeConfig, StartupConfig};
use crate::error::ServerError;
use crate::mechanism::Negotiator;
use crate::middleware::RateLimiter;
use crate::provision::{BootstrapReport, Provisioner, run_bootstrap};
use crate::session::SessionManager;
use crate::store::CredentialStore;

pub struct ServerContext {
    pub config: StartupConfig,
    pub runtime: SharedRuntimeConfig,
    pub store: Arc<CredentialStore>,
    pub negotiator: Arc<Negotiator>,
    pub sessions: Arc<SessionManager>,
    pub api: ClientApi,
    pub provisioner: Provisioner,
    pub limiter: Mutex<RateLimiter>,
}

impl ServerContext {
    pub fn new(config: StartupConfig, runtime: SharedRuntimeConfig) -> Result<Self, ServerError> {
        let iterations = config.iterations()?;
        let store = match config.store_path() {
            Some(path) => CredentialStore::open(path, iterations)?,
            None => {
                info!("No store_path configured; identities are kept in memory");
                CredentialStore::in_memory(iterations)
            }
        };
        let store = Arc::new(store.with_iteration_bounds(config.iteration_bounds()?));
        let negotiator = Arc::new(Negotiator::new(config.mechanism()?, iterations)?);
        let sessions = Arc::new(SessionManager::new(config.session_ttl()));

        let service = Arc::new(AuthenticatorService::new(
            Arc::clone(&store),
            Arc::clone(&negotiator),
            config.max_username_length,
        ));
        let api = ClientApi::new(service, Arc::clone(&sessions), config.default_scope.clone());
        let provisioner = Provisioner::new(
            Arc::clone(&store),
            Arc::clone(&negotiator),
            Arc::clone(&sessions),
        );
        let limiter = Mutex::new(RateLimiter::new(
            config.max_auth_attempts,
            config.auth_window(),
        ));

        Ok(Self {
            config,
            runtime,
            store,
            negotiator,
            sessions,
            api,
            provisioner,
            limiter,
        })
    }

    /// Installs the admin if missing and provisions the configured identity.
    pub fn bootstrap(&self, bootstrap: Option<&BootstrapConfig>) -> Result<BootstrapReport, ServerError> {
        run_bootstrap(&self.store, &self.provisioner, &self.config, bootstrap)
    }
}
