//! SCRAM primitives (RFC 5802, RFC 7677)
//!
//! Verifier derivation, message encoding and the client half of the exchange.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use ring::rand::SecureRandom;
use ring::{digest, hmac, pbkdf2};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::MechanismError;

/// GS2 header for clients without channel binding support.
pub const GS2_HEADER: &str = "n,,";

const NONCE_LEN: usize = 18;

/// Password authentication mechanisms the negotiator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mechanism {
    #[serde(rename = "SCRAM-SHA-1")]
    ScramSha1,
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
}

impl Mechanism {
    pub const ALL: [Mechanism; 2] = [Mechanism::ScramSha1, Mechanism::ScramSha256];

    pub fn name(self) -> &'static str {
        match self {
            Mechanism::ScramSha1 => "SCRAM-SHA-1",
            Mechanism::ScramSha256 => "SCRAM-SHA-256",
        }
    }

    /// Length in bytes of the keys and proofs this mechanism produces.
    pub fn key_len(self) -> usize {
        match self {
            Mechanism::ScramSha1 => 20,
            Mechanism::ScramSha256 => 32,
        }
    }

    fn pbkdf2_algorithm(self) -> pbkdf2::Algorithm {
        match self {
            Mechanism::ScramSha1 => pbkdf2::PBKDF2_HMAC_SHA1,
            Mechanism::ScramSha256 => pbkdf2::PBKDF2_HMAC_SHA256,
        }
    }

    pub(crate) fn hmac_algorithm(self) -> hmac::Algorithm {
        match self {
            Mechanism::ScramSha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Mechanism::ScramSha256 => hmac::HMAC_SHA256,
        }
    }

    fn digest_algorithm(self) -> &'static digest::Algorithm {
        match self {
            Mechanism::ScramSha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Mechanism::ScramSha256 => &digest::SHA256,
        }
    }

    pub(crate) fn hmac(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(self.hmac_algorithm(), key);
        hmac::sign(&key, data).as_ref().to_vec()
    }

    pub(crate) fn hash(self, data: &[u8]) -> Vec<u8> {
        digest::digest(self.digest_algorithm(), data).as_ref().to_vec()
    }

    fn salted_password(self, password: &str, salt: &[u8], iterations: NonZeroU32) -> Vec<u8> {
        let mut out = vec![0u8; self.key_len()];
        pbkdf2::derive(
            self.pbkdf2_algorithm(),
            iterations,
            salt,
            password.as_bytes(),
            &mut out,
        );
        out
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mechanism {
    type Err = MechanismError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mechanism::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MechanismError::UnsupportedMechanism(s.to_string()))
    }
}

/// Stored SCRAM authentication material.
///
/// Text form: `SCRAM-SHA-256$<iterations>:<salt>$<StoredKey>:<ServerKey>`, all
/// binary parts base64 encoded. Neither key can be turned back into the password.
#[derive(Clone, PartialEq, Eq)]
pub struct ScramVerifier {
    pub mechanism: Mechanism,
    pub iterations: NonZeroU32,
    pub salt: Vec<u8>,
    pub stored_key: Vec<u8>,
    pub server_key: Vec<u8>,
}

impl ScramVerifier {
    pub fn derive(
        mechanism: Mechanism,
        password: &SecretString,
        salt: &[u8],
        iterations: NonZeroU32,
    ) -> Self {
        let salted = mechanism.salted_password(password.expose_secret(), salt, iterations);
        let client_key = mechanism.hmac(&salted, b"Client Key");
        Self {
            mechanism,
            iterations,
            salt: salt.to_vec(),
            stored_key: mechanism.hash(&client_key),
            server_key: mechanism.hmac(&salted, b"Server Key"),
        }
    }

    /// Derives a verifier with a fresh random salt.
    pub fn generate(
        mechanism: Mechanism,
        password: &SecretString,
        iterations: NonZeroU32,
        rng: &dyn SecureRandom,
    ) -> Result<Self, MechanismError> {
        let mut salt = [0u8; 16];
        rng.fill(&mut salt)
            .map_err(|_| MechanismError::RandomUnavailable)?;
        Ok(Self::derive(mechanism, password, &salt, iterations))
    }
}

impl fmt::Debug for ScramVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramVerifier")
            .field("mechanism", &self.mechanism)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ScramVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}${}:{}${}:{}",
            self.mechanism,
            self.iterations,
            B64.encode(&self.salt),
            B64.encode(&self.stored_key),
            B64.encode(&self.server_key)
        )
    }
}

impl FromStr for ScramVerifier {
    type Err = MechanismError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |msg: &str| MechanismError::MalformedVerifier(msg.to_string());

        let mut sections = s.split('$');
        let (Some(mech), Some(params), Some(keys), None) = (
            sections.next(),
            sections.next(),
            sections.next(),
            sections.next(),
        ) else {
            return Err(malformed("expected <mechanism>$<params>$<keys>"));
        };

        let mechanism: Mechanism = mech.parse()?;
        let (iterations, salt) = params
            .split_once(':')
            .ok_or_else(|| malformed("missing salt"))?;
        let iterations: NonZeroU32 = iterations
            .parse()
            .map_err(|_| malformed("invalid iteration count"))?;
        let salt = B64.decode(salt).map_err(|_| malformed("salt is not base64"))?;
        if salt.is_empty() {
            return Err(malformed("empty salt"));
        }

        let (stored, server) = keys
            .split_once(':')
            .ok_or_else(|| malformed("missing server key"))?;
        let stored_key = B64
            .decode(stored)
            .map_err(|_| malformed("stored key is not base64"))?;
        let server_key = B64
            .decode(server)
            .map_err(|_| malformed("server key is not base64"))?;
        if stored_key.len() != mechanism.key_len() || server_key.len() != mechanism.key_len() {
            return Err(malformed("key length does not match mechanism"));
        }

        Ok(Self {
            mechanism,
            iterations,
            salt,
            stored_key,
            server_key,
        })
    }
}

/// Range of PBKDF2 iteration counts a stored verifier may carry.
///
/// The floor keeps client-computed verifiers at least as costly as the decoy
/// exchange; the ceiling keeps every exchange bounded in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationBounds {
    min: NonZeroU32,
    max: NonZeroU32,
}

impl IterationBounds {
    /// Ceiling applied when none is configured, as a multiple of the floor.
    pub const DEFAULT_CEILING_FACTOR: u32 = 4;

    /// A `max` below `min` is raised to `min`.
    pub fn new(min: NonZeroU32, max: NonZeroU32) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn from_floor(min: NonZeroU32) -> Self {
        let max = NonZeroU32::new(min.get().saturating_mul(Self::DEFAULT_CEILING_FACTOR));
        Self::new(min, max.unwrap_or(min))
    }

    pub fn min(&self) -> NonZeroU32 {
        self.min
    }

    pub fn max(&self) -> NonZeroU32 {
        self.max
    }

    pub fn check(&self, verifier: &ScramVerifier) -> Result<(), MechanismError> {
        if verifier.iterations < self.min || verifier.iterations > self.max {
            return Err(MechanismError::MalformedVerifier(format!(
                "iteration count {} outside {}..={}",
                verifier.iterations, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Generates a printable random nonce.
pub fn generate_nonce(rng: &dyn SecureRandom) -> Result<String, MechanismError> {
    let mut bytes = [0u8; NONCE_LEN];
    rng.fill(&mut bytes)
        .map_err(|_| MechanismError::RandomUnavailable)?;
    Ok(B64.encode(bytes))
}

fn malformed(msg: impl Into<String>) -> MechanismError {
    MechanismError::MalformedResponse(msg.into())
}

/// Reads `key=value` from an attribute, failing if the key differs.
fn attribute<'a>(part: Option<&'a str>, key: char) -> Result<&'a str, MechanismError> {
    let part = part.ok_or_else(|| malformed(format!("missing attribute '{key}'")))?;
    let mut chars = part.chars();
    match (chars.next(), chars.next()) {
        (Some(k), Some('=')) if k == key => Ok(&part[2..]),
        _ => Err(malformed(format!("expected attribute '{key}'"))),
    }
}

fn decode_username(raw: &str) -> Result<String, MechanismError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('=') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3);
        match escape {
            Some("=2C") => out.push(','),
            Some("=3D") => out.push('='),
            _ => return Err(malformed("invalid username escape")),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

fn encode_username(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

/// `n,,n=<user>,r=<client nonce>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFirst {
    pub gs2_header: String,
    pub username: String,
    pub nonce: String,
    bare: String,
}

impl ClientFirst {
    pub fn new(username: &str, nonce: String) -> Self {
        let bare = format!("n={},r={}", encode_username(username), nonce);
        Self {
            gs2_header: GS2_HEADER.to_string(),
            username: username.to_string(),
            nonce,
            bare,
        }
    }

    pub fn parse(message: &str) -> Result<Self, MechanismError> {
        let mut gs2 = message.splitn(3, ',');
        let flag = gs2.next().unwrap_or_default();
        let authzid = gs2.next().ok_or_else(|| malformed("missing gs2 header"))?;
        let bare = gs2.next().ok_or_else(|| malformed("missing client-first-bare"))?;

        match flag {
            "n" | "y" => {}
            f if f.starts_with("p=") => return Err(malformed("channel binding not supported")),
            _ => return Err(malformed("invalid gs2 channel binding flag")),
        }
        if !authzid.is_empty() {
            return Err(malformed("authorization identity not supported"));
        }

        let mut attrs = bare.split(',');
        if bare.starts_with("m=") {
            return Err(malformed("mandatory extensions not supported"));
        }
        let username = decode_username(attribute(attrs.next(), 'n')?)?;
        let nonce = attribute(attrs.next(), 'r')?;
        if username.is_empty() || nonce.is_empty() {
            return Err(malformed("empty username or nonce"));
        }

        Ok(Self {
            gs2_header: format!("{flag},,"),
            username,
            nonce: nonce.to_string(),
            bare: bare.to_string(),
        })
    }

    pub fn bare(&self) -> &str {
        &self.bare
    }

    pub fn to_message(&self) -> String {
        format!("{}{}", self.gs2_header, self.bare)
    }
}

/// `r=<combined nonce>,s=<salt>,i=<iterations>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFirst {
    pub nonce: String,
    pub salt: Vec<u8>,
    pub iterations: NonZeroU32,
}

impl ServerFirst {
    pub fn parse(message: &str) -> Result<Self, MechanismError> {
        let mut attrs = message.split(',');
        let nonce = attribute(attrs.next(), 'r')?;
        let salt = B64
            .decode(attribute(attrs.next(), 's')?)
            .map_err(|_| malformed("salt is not base64"))?;
        let iterations = attribute(attrs.next(), 'i')?
            .parse()
            .map_err(|_| malformed("invalid iteration count"))?;
        Ok(Self {
            nonce: nonce.to_string(),
            salt,
            iterations,
        })
    }
}

impl fmt::Display for ServerFirst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r={},s={},i={}",
            self.nonce,
            B64.encode(&self.salt),
            self.iterations
        )
    }
}

/// `c=<b64 gs2 header>,r=<combined nonce>,p=<b64 proof>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFinal {
    pub channel_binding: String,
    pub nonce: String,
    pub proof: Vec<u8>,
}

impl ClientFinal {
    pub fn parse(message: &str) -> Result<Self, MechanismError> {
        let (without_proof, proof) = message
            .rsplit_once(",p=")
            .ok_or_else(|| malformed("missing proof"))?;
        let mut attrs = without_proof.split(',');
        let channel_binding = attribute(attrs.next(), 'c')?;
        let nonce = attribute(attrs.next(), 'r')?;
        if attrs.next().is_some() {
            return Err(malformed("unexpected attribute before proof"));
        }
        let proof = B64
            .decode(proof)
            .map_err(|_| malformed("proof is not base64"))?;
        Ok(Self {
            channel_binding: channel_binding.to_string(),
            nonce: nonce.to_string(),
            proof,
        })
    }

    pub fn without_proof(&self) -> String {
        format!("c={},r={}", self.channel_binding, self.nonce)
    }
}

impl fmt::Display for ClientFinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},p={}", self.without_proof(), B64.encode(&self.proof))
    }
}

/// The message both sides sign.
pub fn auth_message(client_first_bare: &str, server_first: &str, client_final_without_proof: &str) -> String {
    format!("{client_first_bare},{server_first},{client_final_without_proof}")
}

/// Equality check for key material without an early exit.
///
/// Equal keys sign the same message identically and `hmac::verify` compares the
/// tags in constant time. Lengths are checked first since HMAC zero-pads keys.
pub(crate) fn keys_match(mechanism: Mechanism, a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let alg = mechanism.hmac_algorithm();
    let tag = hmac::sign(&hmac::Key::new(alg, a), b"scram key comparison");
    hmac::verify(&hmac::Key::new(alg, b), b"scram key comparison", tag.as_ref()).is_ok()
}

pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Client half of a SCRAM exchange.
///
/// Used by in-process callers holding a plaintext password so they go through
/// exactly the exchange a remote client would.
pub struct ScramClient {
    mechanism: Mechanism,
    password: SecretString,
    first: ClientFirst,
    expected_server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(
        mechanism: Mechanism,
        username: &str,
        password: SecretString,
        rng: &dyn SecureRandom,
    ) -> Result<Self, MechanismError> {
        let nonce = generate_nonce(rng)?;
        Ok(Self {
            mechanism,
            password,
            first: ClientFirst::new(username, nonce),
            expected_server_signature: None,
        })
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    pub fn client_first(&self) -> &ClientFirst {
        &self.first
    }

    /// Answers the server-first message with a client-final message.
    pub fn client_final(&mut self, server_first: &str) -> Result<ClientFinal, MechanismError> {
        let parsed = ServerFirst::parse(server_first)?;
        if !parsed.nonce.starts_with(&self.first.nonce) || parsed.nonce == self.first.nonce {
            return Err(malformed("server nonce does not extend client nonce"));
        }

        let m = self.mechanism;
        let salted = m.salted_password(self.password.expose_secret(), &parsed.salt, parsed.iterations);
        let client_key = m.hmac(&salted, b"Client Key");
        let stored_key = m.hash(&client_key);
        let server_key = m.hmac(&salted, b"Server Key");

        let mut reply = ClientFinal {
            channel_binding: B64.encode(&self.first.gs2_header),
            nonce: parsed.nonce,
            proof: Vec::new(),
        };
        let message = auth_message(self.first.bare(), server_first, &reply.without_proof());
        let client_signature = m.hmac(&stored_key, message.as_bytes());
        reply.proof = xor(&client_key, &client_signature);
        self.expected_server_signature = Some(m.hmac(&server_key, message.as_bytes()));
        Ok(reply)
    }

    /// Checks the server-final message, proving the server also knew the verifier.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), MechanismError> {
        let expected = self
            .expected_server_signature
            .as_ref()
            .ok_or_else(|| malformed("client-final not produced yet"))?;
        if let Ok(err) = attribute(Some(server_final), 'e') {
            return Err(malformed(format!("server rejected exchange: {err}")));
        }
        let signature = B64
            .decode(attribute(Some(server_final), 'v')?)
            .map_err(|_| malformed("server signature is not base64"))?;
        if keys_match(self.mechanism, expected, &signature) {
            Ok(())
        } else {
            Err(MechanismError::ServerSignatureMismatch)
        }
    }
}
