//! Request and response bodies of the client-facing API.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthResult;

/// `{"email","password","repeatPassword"}` or `{"email","verifier"}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub email: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub repeat_password: Option<SecretString>,
    /// Client-computed verifier in text form
    #[serde(default)]
    pub verifier: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResponse {
    pub identity_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub email: String,
    pub password: SecretString,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub granted: bool,
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl AuthResponse {
    pub fn from_result(result: &AuthResult, token: Option<String>) -> Self {
        Self {
            granted: result.granted,
            roles: result.role_names(),
            token,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: SecretString,
    pub new_password: SecretString,
    pub repeat_password: SecretString,
}

/// `{"password"}`, re-proving the password before self-service deletion
#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: SecretString,
}
