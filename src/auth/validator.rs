//! Input validation
//!
//! Sanity checks on names, scopes and passwords before they reach the store
//! or the mechanism.

use secrecy::{ExposeSecret, SecretString};

use crate::error::AuthError;
use crate::store::{ADMIN_SCOPE, ANY_SCOPE};

const MAX_PASSWORD_LENGTH: usize = 1024;

/// Performs basic input sanitation to check for malicious or malformed input.
fn is_valid_input(input: &str, max_length: usize) -> bool {
    !input.trim().is_empty() && input.len() <= max_length && !input.contains(['\r', '\n', '\0'])
}

/// Identity names are emails or plain account names; no whitespace.
pub fn validate_name(name: &str, max_length: usize) -> Result<(), AuthError> {
    if !is_valid_input(name, max_length) || name.chars().any(char::is_whitespace) {
        return Err(AuthError::MalformedInput("invalid identity name".into()));
    }
    Ok(())
}

/// Scopes reachable by clients. The admin scope and the wildcard are not.
pub fn validate_scope(scope: &str) -> Result<(), AuthError> {
    if !is_valid_input(scope, 64)
        || scope == ADMIN_SCOPE
        || scope == ANY_SCOPE
        || scope.contains(['@', ' '])
    {
        return Err(AuthError::MalformedInput(format!("invalid scope '{scope}'")));
    }
    Ok(())
}

pub fn validate_password(password: &SecretString) -> Result<(), AuthError> {
    let password = password.expose_secret();
    if password.is_empty() || password.len() > MAX_PASSWORD_LENGTH || password.contains('\0') {
        return Err(AuthError::MalformedInput("invalid password".into()));
    }
    Ok(())
}
