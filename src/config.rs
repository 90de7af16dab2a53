//! Configuration management for the ns-auth server
//!
//! Separates startup configuration (requires restart) from runtime configuration
//! (can be changed while the server is running). An optional `[bootstrap]` table
//! describes the application identity provisioned at first start.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::mechanism::{IterationBounds, Mechanism};
use crate::store::{ADMIN_SCOPE, ANY_SCOPE, DigestOrigin, Role};

/// Searched in order when no explicit path is given.
const CONFIG_PATHS: [&str; 2] = [
    "ns-auth-server/config", // container layout: /app/ns-auth-server/config.toml
    "config",                // local development: ./config.toml
];

const ENV_PREFIX: &str = "NS_AUTH";

/// Complete server configuration with startup/runtime separation
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub server: StartupConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub bootstrap: Option<BootstrapConfig>,
}

/// Configuration that requires server restart to take effect
#[derive(Debug, Deserialize, Clone)]
pub struct StartupConfig {
    // ═══ NETWORK ═══
    /// IP address to bind the control connection
    pub bind_address: String,

    /// Port for the control connection
    pub port: u16,

    // ═══ STORE ═══
    /// JSON snapshot of the credential store; empty keeps it in memory
    #[serde(default)]
    pub store_path: String,

    /// Scope used when a request names none
    pub default_scope: String,

    // ═══ INPUT LIMITS ═══
    pub max_command_length: usize,
    pub max_username_length: usize,

    // ═══ MECHANISM ═══
    pub scram_iterations: u32,

    /// Highest iteration count accepted in a client-computed verifier;
    /// defaults to four times `scram_iterations`
    #[serde(default)]
    pub max_scram_iterations: Option<u32>,

    pub default_mechanism: String,

    // ═══ SESSIONS & RATE LIMITING ═══
    pub session_ttl_secs: u64,
    pub max_auth_attempts: usize,
    pub auth_window_secs: u64,

    // ═══ ADMINISTRATIVE IDENTITY ═══
    pub admin_user: String,

    /// Only needed to install the admin or run the bootstrap; may come from
    /// `NS_AUTH_SERVER__ADMIN_PASSWORD`.
    #[serde(default)]
    pub admin_password: Option<SecretString>,
}

/// Configuration that can be updated at runtime
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Maximum concurrent clients
    /// Environment: NS_AUTH_RUNTIME__MAX_CLIENTS
    pub max_clients: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { max_clients: 64 }
    }
}

/// Application identity created by the bootstrap step.
#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    pub name: String,
    pub password: SecretString,
    pub mechanism: String,
    pub digest_origin: DigestOrigin,
    pub scope: String,
    /// `permission@scope` entries
    pub roles: Vec<String>,
}

/// Thread-safe runtime configuration wrapper
pub type SharedRuntimeConfig = Arc<RwLock<RuntimeConfig>>;

impl ServerConfig {
    /// Load configuration from `path`, or from the default locations, with
    /// environment overrides (`NS_AUTH_SERVER__PORT=2121`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => CONFIG_PATHS.iter().map(PathBuf::from).collect(),
        };

        let mut last_error = None;
        for candidate in &candidates {
            let built = Config::builder()
                .add_source(File::from(candidate.as_path()))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                )
                .build();
            match built {
                Ok(settings) => {
                    let config: ServerConfig = settings.try_deserialize()?;
                    config.validate()?;
                    return Ok(config);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(ConfigError::Message(format!(
            "failed to load configuration from any of {candidates:?}: {}",
            last_error.map_or_else(|| "no candidates".to_string(), |e| e.to_string())
        )))
    }

    /// Parse configuration from TOML text, without environment overrides.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = Config::builder()
            .add_source(File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Split into startup (immutable), runtime (mutable) and bootstrap parts
    pub fn split(self) -> (StartupConfig, SharedRuntimeConfig, Option<BootstrapConfig>) {
        let runtime = Arc::new(RwLock::new(self.runtime));
        (self.server, runtime, self.bootstrap)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.server;
        let fail = |msg: &str| Err(ConfigError::Message(msg.into()));

        if s.port == 0 {
            return fail("port cannot be 0");
        }
        if s.bind_address.trim().is_empty() {
            return fail("bind_address cannot be empty");
        }
        if s.default_scope.trim().is_empty() || s.default_scope == ADMIN_SCOPE || s.default_scope == ANY_SCOPE {
            return fail("default_scope must name an application scope");
        }
        if s.admin_user.trim().is_empty() {
            return fail("admin_user cannot be empty");
        }
        if s.max_command_length == 0 || s.max_username_length == 0 {
            return fail("input limits must be greater than 0");
        }
        if s.scram_iterations == 0 {
            return fail("scram_iterations must be greater than 0");
        }
        if s.max_scram_iterations.is_some_and(|max| max < s.scram_iterations) {
            return fail("max_scram_iterations cannot be below scram_iterations");
        }
        if s.session_ttl_secs == 0 {
            return fail("session_ttl_secs must be greater than 0");
        }
        if s.max_auth_attempts == 0 || s.auth_window_secs == 0 {
            return fail("rate limit settings must be greater than 0");
        }
        s.mechanism()?;

        if self.runtime.max_clients == 0 {
            return fail("max_clients must be greater than 0");
        }

        if let Some(bootstrap) = &self.bootstrap {
            bootstrap.mechanism()?;
            bootstrap.roles()?;
            if bootstrap.name.trim().is_empty() || bootstrap.scope.trim().is_empty() {
                return fail("bootstrap name and scope cannot be empty");
            }
        }

        Ok(())
    }
}

impl StartupConfig {
    /// Bind address and port as a socket address string
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        (!self.store_path.trim().is_empty()).then(|| PathBuf::from(&self.store_path))
    }

    pub fn iterations(&self) -> Result<NonZeroU32, ConfigError> {
        NonZeroU32::new(self.scram_iterations)
            .ok_or_else(|| ConfigError::Message("scram_iterations must be greater than 0".into()))
    }

    /// Iteration range accepted for client-computed verifiers
    pub fn iteration_bounds(&self) -> Result<IterationBounds, ConfigError> {
        let min = self.iterations()?;
        Ok(match self.max_scram_iterations.and_then(NonZeroU32::new) {
            Some(max) => IterationBounds::new(min, max),
            None => IterationBounds::from_floor(min),
        })
    }

    pub fn mechanism(&self) -> Result<Mechanism, ConfigError> {
        parse_mechanism(&self.default_mechanism)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn auth_window(&self) -> Duration {
        Duration::from_secs(self.auth_window_secs)
    }
}

impl BootstrapConfig {
    pub fn mechanism(&self) -> Result<Mechanism, ConfigError> {
        parse_mechanism(&self.mechanism)
    }

    pub fn roles(&self) -> Result<Vec<Role>, ConfigError> {
        self.roles
            .iter()
            .map(|r| Role::parse(r).map_err(|e| ConfigError::Message(e.to_string())))
            .collect()
    }
}

fn parse_mechanism(name: &str) -> Result<Mechanism, ConfigError> {
    name.parse()
        .map_err(|_| ConfigError::Message(format!("unknown mechanism '{name}'")))
}
