//! Error types
//!
//! Defines domain-specific error types for each module of the credential server.

use std::io;

use thiserror::Error;

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity {name} already exists in scope {scope}")]
    DuplicateIdentity { name: String, scope: String },

    #[error("identity {name} not found in scope {scope}")]
    NotFound { name: String, scope: String },

    #[error("identity {0} not found")]
    IdNotFound(uuid::Uuid),

    #[error("an administrative identity already exists")]
    AdminExists,

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("malformed verifier: {0}")]
    MalformedVerifier(String),

    #[error("random source unavailable")]
    RandomUnavailable,

    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Mechanism negotiation errors
#[derive(Debug, Error)]
pub enum MechanismError {
    #[error("unsupported mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("malformed mechanism response: {0}")]
    MalformedResponse(String),

    #[error("malformed verifier: {0}")]
    MalformedVerifier(String),

    #[error("server signature mismatch")]
    ServerSignatureMismatch,

    #[error("random source unavailable")]
    RandomUnavailable,
}

/// Access provisioning errors
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("identity {name} already exists in scope {scope}")]
    DuplicateIdentity { name: String, scope: String },

    #[error("invalid identity spec: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Mechanism(#[from] MechanismError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ProvisionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateIdentity { name, scope } => {
                ProvisionError::DuplicateIdentity { name, scope }
            }
            other => ProvisionError::Store(other),
        }
    }
}

/// Authenticator service errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password does not match repeat password")]
    PasswordMismatch,

    #[error("identity {name} already exists in scope {scope}")]
    DuplicateIdentity { name: String, scope: String },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("malformed mechanism response: {0}")]
    MalformedMechanismResponse(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("random source unavailable")]
    RandomUnavailable,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateIdentity { name, scope } => {
                AuthError::DuplicateIdentity { name, scope }
            }
            // Lookups collapse so callers cannot tell which identities exist.
            StoreError::NotFound { .. } | StoreError::IdNotFound(_) => AuthError::InvalidCredentials,
            StoreError::MalformedVerifier(msg) => AuthError::MalformedInput(msg),
            StoreError::InvalidIdentity(msg) | StoreError::InvalidRole(msg) => {
                AuthError::MalformedInput(msg)
            }
            other => AuthError::Store(other),
        }
    }
}

impl From<MechanismError> for AuthError {
    fn from(error: MechanismError) -> Self {
        match error {
            MechanismError::RandomUnavailable => AuthError::RandomUnavailable,
            MechanismError::ServerSignatureMismatch => AuthError::InvalidCredentials,
            other => AuthError::MalformedMechanismResponse(other.to_string()),
        }
    }
}

/// General server error that encompasses all error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mechanism error: {0}")]
    Mechanism(#[from] MechanismError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Network error: {0}")]
    NetworkError(String),
}
