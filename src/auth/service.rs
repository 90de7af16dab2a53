//! Authenticator service
//!
//! Sign-up and login for external callers. Every lookup or verification failure
//! leaves this module as `InvalidCredentials`, whether or not the identity exists.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use super::results::AuthResult;
use super::validator::{validate_name, validate_password, validate_scope};
use crate::error::AuthError;
use crate::mechanism::{ChallengeMaterial, ClientFinal, ClientFirst, Mechanism, Negotiator, ScramVerifier};
use crate::store::{CredentialStore, Identity, IdentityHandle, NewIdentity, Permission, Role, VerifierInput};

/// Role set granted to self-registered identities.
pub fn default_roles(scope: &str) -> BTreeSet<Role> {
    BTreeSet::from([Role::new(Permission::ReadWrite, scope)])
}

pub struct AuthenticatorService {
    store: Arc<CredentialStore>,
    negotiator: Arc<Negotiator>,
    max_username_length: usize,
}

impl AuthenticatorService {
    pub fn new(
        store: Arc<CredentialStore>,
        negotiator: Arc<Negotiator>,
        max_username_length: usize,
    ) -> Self {
        Self {
            store,
            negotiator,
            max_username_length,
        }
    }

    /// Registers an identity from a plaintext password. The store derives the
    /// verifier; the password is dropped once that is done.
    pub fn sign_up(
        &self,
        name: &str,
        password: SecretString,
        repeat_password: SecretString,
        scope: &str,
    ) -> Result<IdentityHandle, AuthError> {
        if password.expose_secret() != repeat_password.expose_secret() {
            return Err(AuthError::PasswordMismatch);
        }
        validate_name(name, self.max_username_length)?;
        validate_scope(scope)?;
        validate_password(&password)?;

        let identity = self.store.create_identity(NewIdentity {
            name: name.to_string(),
            scope: scope.to_string(),
            verifier: VerifierInput::Plaintext(password),
            mechanism: self.negotiator.default_mechanism(),
            roles: default_roles(scope),
        })?;
        info!("Signed up {}", identity.handle());
        Ok(identity.handle())
    }

    /// Registers an identity whose verifier the caller derived itself. The
    /// password never reaches this process.
    pub fn sign_up_with_verifier(
        &self,
        name: &str,
        verifier: &str,
        scope: &str,
    ) -> Result<IdentityHandle, AuthError> {
        validate_name(name, self.max_username_length)?;
        validate_scope(scope)?;
        let parsed = verifier
            .parse::<ScramVerifier>()
            .map_err(|e| AuthError::MalformedInput(e.to_string()))?;
        self.store
            .iteration_bounds()
            .check(&parsed)
            .map_err(|e| AuthError::MalformedInput(e.to_string()))?;
        let mechanism = parsed.mechanism;

        let identity = self.store.create_identity(NewIdentity {
            name: name.to_string(),
            scope: scope.to_string(),
            verifier: VerifierInput::Precomputed(verifier.to_string()),
            mechanism,
            roles: default_roles(scope),
        })?;
        info!("Signed up {} with a client-computed verifier", identity.handle());
        Ok(identity.handle())
    }

    /// Authenticates with a plaintext password by running the mechanism
    /// exchange in-process.
    pub fn login(
        &self,
        name: &str,
        password: &SecretString,
        scope: &str,
    ) -> Result<AuthResult, AuthError> {
        validate_name(name, self.max_username_length)?;
        validate_scope(scope)?;

        let identity = self.store.lookup(name, scope).ok();
        let verified = self
            .negotiator
            .authenticate_password(identity.as_ref(), name, scope, password)?;

        match identity {
            Some(identity) if verified => Ok(granted(&identity)),
            _ => {
                warn!("Login rejected for {}@{}", name, scope);
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// First half of a wire exchange: parses the client-first message and
    /// issues a challenge. Unknown names get a decoy challenge.
    pub fn start_exchange(
        &self,
        mechanism: Mechanism,
        client_first: &str,
        scope: &str,
    ) -> Result<ChallengeMaterial, AuthError> {
        validate_scope(scope)?;
        let first = ClientFirst::parse(client_first)?;
        validate_name(&first.username, self.max_username_length)?;

        let identity = self.store.lookup(&first.username, scope).ok();
        let challenge = self
            .negotiator
            .challenge(identity.as_ref(), scope, mechanism, &first)?;
        debug!("Issued {} challenge for {}@{}", mechanism, first.username, scope);
        Ok(challenge)
    }

    /// Second half: verifies the client-final message. Returns the result and
    /// the server-final message the client uses to authenticate the server.
    pub fn finish_exchange(
        &self,
        challenge: &ChallengeMaterial,
        client_final: &str,
    ) -> Result<(AuthResult, String), AuthError> {
        let response = ClientFinal::parse(client_final)?;
        let identity = self
            .store
            .lookup(challenge.username(), challenge.scope())
            .ok();

        match identity {
            Some(identity) if self.negotiator.verify(Some(&identity), challenge, &response) => {
                let server_final = self.negotiator.server_final(&identity, challenge, &response)?;
                Ok((granted(&identity), server_final))
            }
            _ => {
                warn!(
                    "Exchange rejected for {}@{}",
                    challenge.username(),
                    challenge.scope()
                );
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// Replaces the password after proving the old one.
    pub fn change_password(
        &self,
        name: &str,
        scope: &str,
        old_password: &SecretString,
        new_password: SecretString,
        repeat_password: SecretString,
    ) -> Result<IdentityHandle, AuthError> {
        if new_password.expose_secret() != repeat_password.expose_secret() {
            return Err(AuthError::PasswordMismatch);
        }
        validate_password(&new_password)?;
        self.login(name, old_password, scope)?;

        let updated = self
            .store
            .update_verifier(name, scope, VerifierInput::Plaintext(new_password))?;
        info!("Password changed for {}", updated.handle());
        Ok(updated.handle())
    }

    /// Self-service removal: the identity behind `id` is deleted once its
    /// password is proven again.
    pub fn delete_identity(&self, id: Uuid, password: &SecretString) -> Result<IdentityHandle, AuthError> {
        let identity = self.store.find_by_id(id)?;
        self.login(&identity.name, password, &identity.scope)?;

        let removed = self.store.revoke(&identity.name, &identity.scope)?;
        info!("Deleted identity {}", removed.handle());
        Ok(removed.handle())
    }
}

fn granted(identity: &Identity) -> AuthResult {
    AuthResult {
        identity: identity.handle(),
        granted: true,
        effective_roles: identity.roles.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::mechanism::ScramClient;
    use std::num::NonZeroU32;
    use std::time::{Duration, Instant};

    const SCOPE: &str = "notes_system";

    fn service_with(iterations: u32) -> (AuthenticatorService, Arc<CredentialStore>, Arc<Negotiator>) {
        let iterations = NonZeroU32::new(iterations).unwrap();
        let store = Arc::new(CredentialStore::in_memory(iterations));
        let negotiator = Arc::new(Negotiator::new(Mechanism::ScramSha256, iterations).unwrap());
        let service = AuthenticatorService::new(Arc::clone(&store), Arc::clone(&negotiator), 64);
        (service, store, negotiator)
    }

    fn service() -> (AuthenticatorService, Arc<CredentialStore>, Arc<Negotiator>) {
        service_with(64)
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s)
    }

    #[test]
    fn test_sign_up_then_login() {
        let (service, _, _) = service();
        let handle = service.sign_up("a@b.com", secret("p"), secret("p"), SCOPE).unwrap();
        assert_eq!(handle.name, "a@b.com");

        let result = service.login("a@b.com", &secret("p"), SCOPE).unwrap();
        assert!(result.granted);
        assert_eq!(result.identity, handle);
        assert_eq!(result.effective_roles, default_roles(SCOPE));
    }

    #[test]
    fn test_wrong_password_and_unknown_identity_look_alike() {
        let (service, _, _) = service();
        service.sign_up("a@b.com", secret("p"), secret("p"), SCOPE).unwrap();

        let wrong = service.login("a@b.com", &secret("wrong"), SCOPE).unwrap_err();
        let missing = service.login("ghost@b.com", &secret("p"), SCOPE).unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(missing, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), missing.to_string());
    }

    #[test]
    fn test_mismatch_writes_nothing() {
        let (service, store, _) = service();
        let err = service.sign_up("a@b.com", secret("p"), secret("q"), SCOPE).unwrap_err();
        assert!(matches!(err, AuthError::PasswordMismatch));
        assert!(matches!(
            store.lookup("a@b.com", SCOPE),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_sign_up() {
        let (service, _, _) = service();
        service.sign_up("a@b.com", secret("p"), secret("p"), SCOPE).unwrap();
        assert!(matches!(
            service.sign_up("a@b.com", secret("x"), secret("x"), SCOPE),
            Err(AuthError::DuplicateIdentity { .. })
        ));
    }

    #[test]
    fn test_sign_up_with_verifier_is_client_computed() {
        let (service, store, negotiator) = service();
        let verifier = ScramVerifier::generate(
            Mechanism::ScramSha1,
            &secret("nsuser"),
            negotiator.iterations(),
            negotiator.rng(),
        )
        .unwrap()
        .to_string();

        service.sign_up_with_verifier("nsuser", &verifier, SCOPE).unwrap();
        let stored = store.lookup("nsuser", SCOPE).unwrap();
        assert_eq!(stored.verifier, verifier);
        assert_eq!(stored.mechanism, Mechanism::ScramSha1);

        assert!(service.login("nsuser", &secret("nsuser"), SCOPE).unwrap().granted);
        assert!(matches!(
            service.sign_up_with_verifier("x", "plaintext", SCOPE),
            Err(AuthError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_client_verifier_iterations_are_bounded() {
        let (service, store, negotiator) = service();
        let bounds = store.iteration_bounds();
        let verifier_with = |count: u32| {
            ScramVerifier::generate(
                Mechanism::ScramSha256,
                &secret("y"),
                NonZeroU32::new(count).unwrap(),
                negotiator.rng(),
            )
            .unwrap()
            .to_string()
        };

        // Too cheap: a wrong-password login would be faster than the decoy path.
        assert!(matches!(
            service.sign_up_with_verifier("cheap", &verifier_with(1), SCOPE),
            Err(AuthError::MalformedInput(_))
        ));
        // Too costly: login would not finish in bounded time.
        let costly = verifier_with(bounds.min().get()).replacen(
            &format!("${}:", bounds.min()),
            "$4000000000:",
            1,
        );
        assert!(matches!(
            service.sign_up_with_verifier("costly", &costly, SCOPE),
            Err(AuthError::MalformedInput(_))
        ));
        assert!(store.is_empty());

        service
            .sign_up_with_verifier("edge", &verifier_with(bounds.max().get()), SCOPE)
            .unwrap();
        assert!(service.login("edge", &secret("y"), SCOPE).is_ok());
    }

    #[test]
    fn test_wire_exchange() {
        let (service, _, negotiator) = service();
        service.sign_up("a@b.com", secret("p"), secret("p"), SCOPE).unwrap();

        let mut client =
            ScramClient::new(Mechanism::ScramSha256, "a@b.com", secret("p"), negotiator.rng()).unwrap();
        let challenge = service
            .start_exchange(Mechanism::ScramSha256, &client.client_first().to_message(), SCOPE)
            .unwrap();
        let reply = client.client_final(&challenge.server_first_message()).unwrap();
        let (result, server_final) = service.finish_exchange(&challenge, &reply.to_string()).unwrap();
        assert!(result.granted);
        client.verify_server_final(&server_final).unwrap();
    }

    #[test]
    fn test_wire_exchange_rejects_channel_binding_and_garbage() {
        let (service, _, _) = service();
        assert!(matches!(
            service.start_exchange(Mechanism::ScramSha256, "p=tls-unique,,n=a,r=abc", SCOPE),
            Err(AuthError::MalformedMechanismResponse(_))
        ));

        let challenge = service
            .start_exchange(Mechanism::ScramSha256, "n,,n=ghost,r=abc", SCOPE)
            .unwrap();
        assert!(service.finish_exchange(&challenge, "garbage").is_err());
    }

    #[test]
    fn test_change_password() {
        let (service, _, _) = service();
        service.sign_up("a@b.com", secret("old"), secret("old"), SCOPE).unwrap();

        assert!(matches!(
            service.change_password("a@b.com", SCOPE, &secret("old"), secret("n1"), secret("n2")),
            Err(AuthError::PasswordMismatch)
        ));
        assert!(matches!(
            service.change_password("a@b.com", SCOPE, &secret("bad"), secret("new"), secret("new")),
            Err(AuthError::InvalidCredentials)
        ));

        service
            .change_password("a@b.com", SCOPE, &secret("old"), secret("new"), secret("new"))
            .unwrap();
        assert!(service.login("a@b.com", &secret("old"), SCOPE).is_err());
        assert!(service.login("a@b.com", &secret("new"), SCOPE).is_ok());
    }

    #[test]
    fn test_delete_identity() {
        let (service, store, _) = service();
        let handle = service.sign_up("a@b.com", secret("p"), secret("p"), SCOPE).unwrap();

        assert!(matches!(
            service.delete_identity(handle.id, &secret("wrong")),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(store.lookup("a@b.com", SCOPE).is_ok());

        assert_eq!(service.delete_identity(handle.id, &secret("p")).unwrap(), handle);
        assert!(store.is_empty());
        assert!(matches!(
            service.delete_identity(handle.id, &secret("p")),
            Err(AuthError::InvalidCredentials)
        ));
    }

    fn median(mut samples: Vec<Duration>) -> Duration {
        samples.sort();
        samples[samples.len() / 2]
    }

    #[test]
    fn test_failure_latency_does_not_reveal_existence() {
        let (service, _, _) = service_with(2048);
        service.sign_up("a@b.com", secret("p"), secret("p"), SCOPE).unwrap();

        let time = |name: &str| {
            let start = Instant::now();
            let _ = service.login(name, &secret("wrong"), SCOPE);
            start.elapsed()
        };
        let existing = median((0..9).map(|_| time("a@b.com")).collect());
        let missing = median((0..9).map(|_| time("ghost@b.com")).collect());

        let ratio = existing.as_secs_f64() / missing.as_secs_f64();
        assert!((0.3..3.0).contains(&ratio), "ratio {ratio}");
    }
}
