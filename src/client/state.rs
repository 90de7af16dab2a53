//! Module `state`
//!
//! Per-connection authentication state:
//! `Idle -> ChallengeIssued -> {Authenticated, Rejected}`.

use std::net::SocketAddr;

use crate::api::Authenticated;
use crate::mechanism::ChallengeMaterial;

#[derive(Debug, Default)]
pub enum AuthState {
    #[default]
    Idle,
    ChallengeIssued(Box<ChallengeMaterial>),
    Authenticated(Authenticated),
    Rejected,
}

/// Represents the state of a connected client.
#[derive(Debug)]
pub struct Client {
    client_addr: SocketAddr,
    state: AuthState,
}

impl Client {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr,
            state: AuthState::Idle,
        }
    }

    /// Clears the authentication state and returns the token that was held.
    pub fn logout(&mut self) -> Option<String> {
        match std::mem::take(&mut self.state) {
            AuthState::Authenticated(session) => Some(session.token),
            _ => None,
        }
    }

    // --------------------
    // Getter methods
    // --------------------

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated(_))
    }

    pub fn session(&self) -> Option<&Authenticated> {
        match &self.state {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    /// Key used for per-address rate limiting.
    pub fn rate_limit_key(&self) -> String {
        self.client_addr.ip().to_string()
    }

    // --------------------
    // Transitions
    // --------------------

    /// Starting an exchange drops any previous session on this connection.
    pub fn set_challenge(&mut self, challenge: ChallengeMaterial) -> Option<String> {
        let previous = self.logout();
        self.state = AuthState::ChallengeIssued(Box::new(challenge));
        previous
    }

    /// Takes the pending challenge, leaving the state `Idle`. A challenge is
    /// answered at most once.
    pub fn take_challenge(&mut self) -> Option<ChallengeMaterial> {
        match std::mem::take(&mut self.state) {
            AuthState::ChallengeIssued(challenge) => Some(*challenge),
            other => {
                self.state = other;
                None
            }
        }
    }

    pub fn set_authenticated(&mut self, session: Authenticated) -> Option<String> {
        let previous = self.logout();
        self.state = AuthState::Authenticated(session);
        previous
    }

    pub fn set_rejected(&mut self) -> Option<String> {
        let previous = self.logout();
        self.state = AuthState::Rejected;
        previous
    }
}
