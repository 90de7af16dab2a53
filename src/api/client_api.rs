//! Client-facing API
//!
//! The operations the web client calls. Every call returns a tagged
//! `Result<_, ApiError>`; nothing is inferred from unstructured replies.

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use super::dto::{
    AuthRequest, AuthResponse, ChangePasswordRequest, DeleteAccountRequest, SignUpRequest,
    SignUpResponse,
};
use crate::auth::{AuthResult, AuthenticatorService};
use crate::error::{ApiError, AuthError};
use crate::mechanism::{ChallengeMaterial, Mechanism};
use crate::session::SessionManager;

/// A granted login together with its bearer token.
#[derive(Clone)]
pub struct Authenticated {
    pub result: AuthResult,
    pub token: String,
}

impl fmt::Debug for Authenticated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticated")
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

impl Authenticated {
    pub fn response(&self) -> AuthResponse {
        AuthResponse::from_result(&self.result, Some(self.token.clone()))
    }
}

pub struct ClientApi {
    service: Arc<AuthenticatorService>,
    sessions: Arc<SessionManager>,
    default_scope: String,
}

impl ClientApi {
    pub fn new(
        service: Arc<AuthenticatorService>,
        sessions: Arc<SessionManager>,
        default_scope: impl Into<String>,
    ) -> Self {
        Self {
            service,
            sessions,
            default_scope: default_scope.into(),
        }
    }

    pub fn default_scope(&self) -> &str {
        &self.default_scope
    }

    pub fn sign_up(&self, request: SignUpRequest) -> Result<SignUpResponse, ApiError> {
        let scope = request.scope.as_deref().unwrap_or(&self.default_scope);
        let handle = match (request.password, request.verifier) {
            (Some(password), None) => {
                let repeat = request
                    .repeat_password
                    .ok_or_else(|| ApiError::bad_request("repeatPassword is required"))?;
                self.service.sign_up(&request.email, password, repeat, scope)?
            }
            (None, Some(verifier)) => {
                self.service
                    .sign_up_with_verifier(&request.email, &verifier, scope)?
            }
            _ => {
                return Err(ApiError::bad_request(
                    "exactly one of password or verifier is required",
                ));
            }
        };
        Ok(SignUpResponse {
            identity_id: handle.id,
        })
    }

    pub fn auth(&self, request: AuthRequest) -> Result<Authenticated, ApiError> {
        let scope = request.scope.as_deref().unwrap_or(&self.default_scope);
        let result = self.service.login(&request.email, &request.password, scope)?;
        self.open_session(result)
    }

    /// Starts a SASL exchange from `<mechanism> <base64 client-first>`.
    /// Returns the challenge to keep and the base64 server-first message.
    pub fn sasl_start(&self, argument: &str) -> Result<(ChallengeMaterial, String), ApiError> {
        let (mechanism, payload) = argument
            .split_once(' ')
            .ok_or_else(|| ApiError::bad_request("expected <mechanism> <payload>"))?;
        let mechanism: Mechanism = mechanism
            .parse()
            .map_err(|e: crate::error::MechanismError| ApiError::bad_request(e.to_string()))?;
        let client_first = decode_payload(payload)?;

        let challenge = self
            .service
            .start_exchange(mechanism, &client_first, &self.default_scope)?;
        let server_first = B64.encode(challenge.server_first_message());
        Ok((challenge, server_first))
    }

    /// Completes a SASL exchange. Returns the session and the base64
    /// server-final message.
    pub fn sasl_continue(
        &self,
        challenge: &ChallengeMaterial,
        payload: &str,
    ) -> Result<(Authenticated, String), ApiError> {
        let client_final = decode_payload(payload)?;
        let (result, server_final) = self.service.finish_exchange(challenge, &client_final)?;
        Ok((self.open_session(result)?, B64.encode(server_final)))
    }

    pub fn change_password(
        &self,
        session: &AuthResult,
        request: ChangePasswordRequest,
    ) -> Result<(), ApiError> {
        self.service.change_password(
            &session.identity.name,
            &session.identity.scope,
            &request.old_password,
            request.new_password,
            request.repeat_password,
        )?;
        Ok(())
    }

    /// Deletes the session's own identity and ends all of its sessions.
    pub fn delete_account(
        &self,
        session: &AuthResult,
        request: DeleteAccountRequest,
    ) -> Result<(), ApiError> {
        let removed = self
            .service
            .delete_identity(session.identity.id, &request.password)?;
        self.sessions.revoke_identity(removed.id);
        Ok(())
    }

    pub fn check(&self, token: &str) -> Result<AuthResult, ApiError> {
        Ok(self.sessions.validate(token)?)
    }

    /// Exchanges a live token for a new one; the old token stops working.
    pub fn refresh(&self, token: &str) -> Result<Authenticated, ApiError> {
        let (result, token) = self.sessions.refresh(token)?;
        Ok(Authenticated { result, token })
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.logout(token)
    }

    fn open_session(&self, result: AuthResult) -> Result<Authenticated, ApiError> {
        let token = self.sessions.issue(&result)?;
        Ok(Authenticated { result, token })
    }
}

fn decode_payload(payload: &str) -> Result<String, ApiError> {
    let bytes = B64
        .decode(payload.trim())
        .map_err(|_| ApiError::from(AuthError::MalformedMechanismResponse("payload is not base64".into())))?;
    String::from_utf8(bytes)
        .map_err(|_| ApiError::from(AuthError::MalformedMechanismResponse("payload is not UTF-8".into())))
}
