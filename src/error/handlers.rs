//! Error handlers
//!
//! Maps domain errors to the application error kinds callers see, with their
//! `NS-` codes and protocol reply codes.

use log::error;
use serde::Serialize;

use crate::error::types::{AuthError, ProvisionError, ServerError};

/// What a caller is told went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    System,
    BadRequest,
    PasswordMismatch,
    MalformedMechanismResponse,
    InvalidCredentials,
    DuplicateIdentity,
    Unauthorized,
    BadSequence,
    UnknownCommand,
    Unavailable,
}

impl ErrorKind {
    /// Application error code
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::System => "NS-000001",
            ErrorKind::BadRequest | ErrorKind::BadSequence | ErrorKind::UnknownCommand => "NS-000002",
            ErrorKind::InvalidCredentials => "NS-000003",
            ErrorKind::DuplicateIdentity => "NS-000004",
            ErrorKind::Unauthorized => "NS-000005",
            ErrorKind::Unavailable => "NS-000006",
            ErrorKind::PasswordMismatch => "NS-000007",
            ErrorKind::MalformedMechanismResponse => "NS-000008",
        }
    }

    /// Protocol reply code
    pub fn reply_code(self) -> u16 {
        match self {
            ErrorKind::System => 451,
            ErrorKind::BadRequest
            | ErrorKind::PasswordMismatch
            | ErrorKind::MalformedMechanismResponse => 400,
            ErrorKind::InvalidCredentials | ErrorKind::Unauthorized => 530,
            ErrorKind::DuplicateIdentity => 409,
            ErrorKind::BadSequence => 503,
            ErrorKind::UnknownCommand => 500,
            ErrorKind::Unavailable => 421,
        }
    }
}

/// Error as returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let kind = auth_error_kind(&err);
        let message = match kind {
            ErrorKind::System => {
                error!("Authentication backend failure: {}", err);
                "internal error".to_string()
            }
            ErrorKind::InvalidCredentials => "invalid credentials".to_string(),
            _ => err.to_string(),
        };
        ApiError::new(kind, message)
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        let kind = provision_error_kind(&err);
        if kind == ErrorKind::System {
            error!("Provisioning backend failure: {}", err);
        }
        ApiError::new(kind, err.to_string())
    }
}

pub fn auth_error_kind(err: &AuthError) -> ErrorKind {
    match err {
        AuthError::PasswordMismatch => ErrorKind::PasswordMismatch,
        AuthError::MalformedMechanismResponse(_) => ErrorKind::MalformedMechanismResponse,
        AuthError::MalformedInput(_) => ErrorKind::BadRequest,
        AuthError::DuplicateIdentity { .. } => ErrorKind::DuplicateIdentity,
        AuthError::InvalidCredentials => ErrorKind::InvalidCredentials,
        AuthError::NotAuthenticated => ErrorKind::BadSequence,
        AuthError::RandomUnavailable | AuthError::Store(_) => ErrorKind::System,
    }
}

pub fn provision_error_kind(err: &ProvisionError) -> ErrorKind {
    match err {
        ProvisionError::Unauthorized(_) => ErrorKind::Unauthorized,
        ProvisionError::DuplicateIdentity { .. } => ErrorKind::DuplicateIdentity,
        ProvisionError::InvalidSpec(_) => ErrorKind::BadRequest,
        ProvisionError::Mechanism(_) | ProvisionError::Store(_) => ErrorKind::System,
    }
}

/// Log a server error
pub fn handle_error(err: &ServerError) {
    error!("ns-auth server error: {}", err);
}

/// Process exit code for a fatal server error
pub fn exit_code(err: &ServerError) -> u8 {
    match err {
        ServerError::Config(_) => 2,
        ServerError::Provision(ProvisionError::Unauthorized(_)) => 3,
        ServerError::IoError(_) | ServerError::NetworkError(_) => 4,
        _ => 1,
    }
}
