//! Session manager
//!
//! Issues opaque bearer tokens for authenticated identities and tracks their
//! expiry. All session state lives in the manager value; there is no ambient
//! "current user".

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::debug;
use parking_lot::RwLock;
use ring::rand::{SecureRandom, SystemRandom};
use uuid::Uuid;

use crate::auth::AuthResult;
use crate::error::AuthError;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct Session {
    pub result: AuthResult,
    pub expires_at: Instant,
}

impl Session {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

pub struct SessionManager {
    ttl: Duration,
    rng: SystemRandom,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            rng: SystemRandom::new(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Issues a token for a granted authentication result. Expired sessions
    /// are pruned first, so abandoned tokens do not accumulate.
    pub fn issue(&self, result: &AuthResult) -> Result<String, AuthError> {
        if !result.granted {
            return Err(AuthError::InvalidCredentials);
        }
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| AuthError::RandomUnavailable)?;
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let now = Instant::now();
        let session = Session {
            result: result.clone(),
            expires_at: now + self.ttl,
        };
        let mut sessions = self.sessions.write();
        sessions.retain(|_, s| !s.is_expired(now));
        sessions.insert(token.clone(), session);
        debug!("Issued session for {}", result.identity);
        Ok(token)
    }

    /// Returns the session behind `token` if it exists and has not expired.
    /// Expired sessions are pruned on the way.
    pub fn validate(&self, token: &str) -> Result<AuthResult, AuthError> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(token) {
                Some(session) if !session.is_expired(now) => return Ok(session.result.clone()),
                Some(_) => {}
                None => return Err(AuthError::InvalidCredentials),
            }
        }
        self.sessions.write().retain(|_, s| !s.is_expired(now));
        Err(AuthError::InvalidCredentials)
    }

    /// Rotates a live token: the old one stops working and a new one with a
    /// fresh expiry is issued for the same result.
    pub fn refresh(&self, token: &str) -> Result<(AuthResult, String), AuthError> {
        let now = Instant::now();
        let session = self
            .sessions
            .write()
            .remove(token)
            .filter(|s| !s.is_expired(now))
            .ok_or(AuthError::InvalidCredentials)?;
        let fresh = self.issue(&session.result)?;
        Ok((session.result, fresh))
    }

    /// Ends a session. Unknown tokens are ignored.
    pub fn logout(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// Drops every session belonging to `identity_id`.
    pub fn revoke_identity(&self, identity_id: Uuid) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.result.identity.id != identity_id);
        before - sessions.len()
    }

    pub fn active(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .read()
            .values()
            .filter(|s| !s.is_expired(now))
            .count()
    }
}
