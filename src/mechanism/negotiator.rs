//! Mechanism negotiator
//!
//! Issues SCRAM challenges for identities and verifies the client's proof.
//! Unknown identities get a decoy challenge so the exchange looks and costs the
//! same whether or not the identity exists.

use std::num::NonZeroU32;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::SecretString;

use super::scram::{
    ClientFinal, ClientFirst, Mechanism, ScramClient, ScramVerifier, ServerFirst, auth_message,
    generate_nonce, keys_match, xor,
};
use crate::error::MechanismError;
use crate::store::Identity;

/// Server state carried between the challenge and the client's answer.
#[derive(Debug, Clone)]
pub struct ChallengeMaterial {
    mechanism: Mechanism,
    username: String,
    scope: String,
    gs2_header: String,
    client_first_bare: String,
    server_first: ServerFirst,
    decoy: bool,
}

impl ChallengeMaterial {
    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn salt(&self) -> &[u8] {
        &self.server_first.salt
    }

    pub fn iterations(&self) -> NonZeroU32 {
        self.server_first.iterations
    }

    /// The server-first message to send to the client.
    pub fn server_first_message(&self) -> String {
        self.server_first.to_string()
    }

    fn auth_message(&self, response: &ClientFinal) -> String {
        auth_message(
            &self.client_first_bare,
            &self.server_first_message(),
            &response.without_proof(),
        )
    }
}

pub struct Negotiator {
    rng: SystemRandom,
    decoy_key: hmac::Key,
    default_mechanism: Mechanism,
    iterations: NonZeroU32,
}

impl Negotiator {
    pub fn new(default_mechanism: Mechanism, iterations: NonZeroU32) -> Result<Self, MechanismError> {
        let rng = SystemRandom::new();
        let mut secret = [0u8; 32];
        rng.fill(&mut secret)
            .map_err(|_| MechanismError::RandomUnavailable)?;
        Ok(Self {
            rng,
            decoy_key: hmac::Key::new(hmac::HMAC_SHA256, &secret),
            default_mechanism,
            iterations,
        })
    }

    pub fn default_mechanism(&self) -> Mechanism {
        self.default_mechanism
    }

    /// Iteration count used for verifiers derived on this server.
    pub fn iterations(&self) -> NonZeroU32 {
        self.iterations
    }

    pub fn rng(&self) -> &dyn SecureRandom {
        &self.rng
    }

    /// Produces the randomized challenge for `identity` (or a decoy when it is
    /// absent or registered under a different mechanism).
    pub fn challenge(
        &self,
        identity: Option<&Identity>,
        scope: &str,
        mechanism: Mechanism,
        client_first: &ClientFirst,
    ) -> Result<ChallengeMaterial, MechanismError> {
        let stored = identity
            .filter(|i| i.mechanism == mechanism)
            .and_then(|i| i.verifier.parse::<ScramVerifier>().ok());
        let decoy = stored.is_none();
        let verifier =
            stored.unwrap_or_else(|| self.decoy_verifier(mechanism, &client_first.username, scope));

        let server_nonce = generate_nonce(&self.rng)?;
        Ok(ChallengeMaterial {
            mechanism,
            username: client_first.username.clone(),
            scope: scope.to_string(),
            gs2_header: client_first.gs2_header.clone(),
            client_first_bare: client_first.bare().to_string(),
            server_first: ServerFirst {
                nonce: format!("{}{}", client_first.nonce, server_nonce),
                salt: verifier.salt,
                iterations: verifier.iterations,
            },
            decoy,
        })
    }

    /// Checks the client's proof against the stored verifier.
    ///
    /// Any mismatch, missing identity or malformed response is `false`.
    pub fn verify(
        &self,
        identity: Option<&Identity>,
        challenge: &ChallengeMaterial,
        response: &ClientFinal,
    ) -> bool {
        let verifier = match self.verifier_for(identity, challenge) {
            Some(v) => v,
            None => self.decoy_verifier(challenge.mechanism, &challenge.username, &challenge.scope),
        };

        let m = challenge.mechanism;
        let message = challenge.auth_message(response);
        let client_signature = m.hmac(&verifier.stored_key, message.as_bytes());
        let client_key = xor(&response.proof, &client_signature);
        let proof_ok = response.proof.len() == m.key_len()
            && keys_match(m, &m.hash(&client_key), &verifier.stored_key);

        let binding_ok = response.channel_binding == B64.encode(&challenge.gs2_header);
        let nonce_ok = response.nonce == challenge.server_first.nonce;

        proof_ok && binding_ok && nonce_ok && !challenge.decoy && identity.is_some()
    }

    /// Builds the server-final message proving the server knows the verifier.
    pub fn server_final(
        &self,
        identity: &Identity,
        challenge: &ChallengeMaterial,
        response: &ClientFinal,
    ) -> Result<String, MechanismError> {
        let verifier = self
            .verifier_for(Some(identity), challenge)
            .ok_or_else(|| MechanismError::MalformedVerifier(identity.name.clone()))?;
        let message = challenge.auth_message(response);
        let signature = challenge.mechanism.hmac(&verifier.server_key, message.as_bytes());
        Ok(format!("v={}", B64.encode(signature)))
    }

    /// Runs the full exchange in-process for a caller holding the password.
    pub fn authenticate_password(
        &self,
        identity: Option<&Identity>,
        name: &str,
        scope: &str,
        password: &SecretString,
    ) -> Result<bool, MechanismError> {
        let mechanism = identity.map_or(self.default_mechanism, |i| i.mechanism);
        let mut client = ScramClient::new(mechanism, name, password.clone(), &self.rng)?;
        let challenge = self.challenge(identity, scope, mechanism, client.client_first())?;
        let response = client.client_final(&challenge.server_first_message())?;
        Ok(self.verify(identity, &challenge, &response))
    }

    fn verifier_for(
        &self,
        identity: Option<&Identity>,
        challenge: &ChallengeMaterial,
    ) -> Option<ScramVerifier> {
        identity
            .filter(|i| {
                i.mechanism == challenge.mechanism
                    && i.name == challenge.username
                    && i.scope == challenge.scope
            })
            .and_then(|i| i.verifier.parse().ok())
    }

    /// Stable per (scope, name) for the lifetime of the process, so repeated
    /// attempts against the same unknown name see the same salt.
    fn decoy_verifier(&self, mechanism: Mechanism, name: &str, scope: &str) -> ScramVerifier {
        let derive = |label: &str, len: usize| {
            let input = format!("{label}\0{scope}\0{name}");
            let tag = hmac::sign(&self.decoy_key, input.as_bytes());
            tag.as_ref()[..len].to_vec()
        };
        ScramVerifier {
            mechanism,
            iterations: self.iterations,
            salt: derive("salt", 16),
            stored_key: derive("stored", mechanism.key_len()),
            server_key: derive("server", mechanism.key_len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DigestOrigin, Identity, Role};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn negotiator() -> Negotiator {
        Negotiator::new(Mechanism::ScramSha256, NonZeroU32::new(32).unwrap()).unwrap()
    }

    fn identity(n: &Negotiator, mechanism: Mechanism, password: &str) -> Identity {
        let verifier = ScramVerifier::generate(
            mechanism,
            &SecretString::from(password),
            n.iterations(),
            n.rng(),
        )
        .unwrap();
        Identity {
            id: Uuid::new_v4(),
            name: "nsuser".into(),
            scope: "notes_system".into(),
            verifier: verifier.to_string(),
            mechanism,
            digest_origin: DigestOrigin::ServerComputed,
            roles: BTreeSet::from([Role::parse("readWrite@notes_system").unwrap()]),
            administrative: false,
        }
    }

    #[test]
    fn test_correct_password_verifies() {
        let n = negotiator();
        for mechanism in Mechanism::ALL {
            let id = identity(&n, mechanism, "nsuser");
            let ok = n
                .authenticate_password(Some(&id), "nsuser", "notes_system", &SecretString::from("nsuser"))
                .unwrap();
            assert!(ok, "{mechanism} should verify");
        }
    }

    #[test]
    fn test_wrong_password_is_false_not_error() {
        let n = negotiator();
        let id = identity(&n, Mechanism::ScramSha256, "right");
        let ok = n
            .authenticate_password(Some(&id), "nsuser", "notes_system", &SecretString::from("wrong"))
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_missing_identity_gets_stable_decoy() {
        let n = negotiator();
        let first = ClientFirst::new("ghost", "abc".into());
        let a = n.challenge(None, "notes_system", Mechanism::ScramSha256, &first).unwrap();
        let b = n.challenge(None, "notes_system", Mechanism::ScramSha256, &first).unwrap();
        assert_eq!(a.salt(), b.salt());
        assert_eq!(a.iterations(), n.iterations());
        assert_ne!(a.server_first_message(), b.server_first_message());

        let ok = n
            .authenticate_password(None, "ghost", "notes_system", &SecretString::from("x"))
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_server_final_is_accepted_by_client() {
        let n = negotiator();
        let id = identity(&n, Mechanism::ScramSha1, "pw");
        let mut client =
            ScramClient::new(Mechanism::ScramSha1, "nsuser", SecretString::from("pw"), n.rng()).unwrap();
        let challenge = n
            .challenge(Some(&id), "notes_system", Mechanism::ScramSha1, client.client_first())
            .unwrap();
        let response = client.client_final(&challenge.server_first_message()).unwrap();
        assert!(n.verify(Some(&id), &challenge, &response));

        let server_final = n.server_final(&id, &challenge, &response).unwrap();
        client.verify_server_final(&server_final).unwrap();
        assert!(client.verify_server_final("v=AAAA").is_err());
    }

    #[test]
    fn test_tampered_response_is_rejected() {
        let n = negotiator();
        let id = identity(&n, Mechanism::ScramSha256, "pw");
        let mut client =
            ScramClient::new(Mechanism::ScramSha256, "nsuser", SecretString::from("pw"), n.rng()).unwrap();
        let challenge = n
            .challenge(Some(&id), "notes_system", Mechanism::ScramSha256, client.client_first())
            .unwrap();
        let response = client.client_final(&challenge.server_first_message()).unwrap();

        let mut wrong_nonce = response.clone();
        wrong_nonce.nonce.push('x');
        assert!(!n.verify(Some(&id), &challenge, &wrong_nonce));

        let mut short_proof = response.clone();
        short_proof.proof.truncate(4);
        assert!(!n.verify(Some(&id), &challenge, &short_proof));

        let mut flipped = response;
        flipped.proof[0] ^= 1;
        assert!(!n.verify(Some(&id), &challenge, &flipped));
    }

    #[test]
    fn test_mechanism_mismatch_is_decoy() {
        let n = negotiator();
        let id = identity(&n, Mechanism::ScramSha1, "pw");
        let mut client =
            ScramClient::new(Mechanism::ScramSha256, "nsuser", SecretString::from("pw"), n.rng()).unwrap();
        let challenge = n
            .challenge(Some(&id), "notes_system", Mechanism::ScramSha256, client.client_first())
            .unwrap();
        let response = client.client_final(&challenge.server_first_message()).unwrap();
        assert!(!n.verify(Some(&id), &challenge, &response));
    }
}
