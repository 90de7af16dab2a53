//! Credential store
//!
//! Holds one identity record per `(name, scope)`. Writes are serialized by a
//! single lock and, when a path is configured, every mutation is persisted as a
//! JSON snapshot that atomically replaces the previous one.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::num::NonZeroU32;
use std::path::PathBuf;

use log::{debug, info, warn};
use parking_lot::RwLock;
use ring::rand::SystemRandom;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::{
    ADMIN_SCOPE, ANY_SCOPE, DigestOrigin, Identity, NewIdentity, Permission, Role, VerifierInput,
};
use crate::error::StoreError;
use crate::mechanism::{IterationBounds, Mechanism, ScramVerifier};

const SNAPSHOT_VERSION: u32 = 1;
const MAX_NAME_LENGTH: usize = 256;

type IdentityKey = (String, String);

fn key(name: &str, scope: &str) -> IdentityKey {
    (scope.to_string(), name.to_string())
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    identities: Vec<Identity>,
}

pub struct CredentialStore {
    records: RwLock<HashMap<IdentityKey, Identity>>,
    path: Option<PathBuf>,
    bounds: IterationBounds,
    rng: SystemRandom,
}

impl CredentialStore {
    /// A store that lives only in memory.
    pub fn in_memory(iterations: NonZeroU32) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            path: None,
            bounds: IterationBounds::from_floor(iterations),
            rng: SystemRandom::new(),
        }
    }

    /// Opens (or starts) a store persisted at `path`.
    pub fn open(path: impl Into<PathBuf>, iterations: NonZeroU32) -> Result<Self, StoreError> {
        let path = path.into();
        let mut records = HashMap::new();

        if path.exists() {
            let snapshot: Snapshot = serde_json::from_slice(&fs::read(&path)?)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(StoreError::InvalidIdentity(format!(
                    "unsupported snapshot version {}",
                    snapshot.version
                )));
            }
            for identity in snapshot.identities {
                records.insert(key(&identity.name, &identity.scope), identity);
            }
            info!("Loaded {} identities from {}", records.len(), path.display());
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
            bounds: IterationBounds::from_floor(iterations),
            rng: SystemRandom::new(),
        })
    }

    /// Sets the iteration range accepted for client-computed verifiers.
    /// Server-derived verifiers always use the floor.
    pub fn with_iteration_bounds(mut self, bounds: IterationBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn iteration_bounds(&self) -> IterationBounds {
        self.bounds
    }

    /// Creates an identity. Exactly one of several concurrent creations for
    /// the same `(name, scope)` succeeds; the rest fail `DuplicateIdentity`.
    pub fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        validate_key(&new.name, &new.scope)?;
        if new.scope == ADMIN_SCOPE {
            return Err(StoreError::InvalidIdentity(
                "the admin scope is reserved for the administrative identity".into(),
            ));
        }
        validate_roles(&new.roles, &new.scope)?;

        // Derive outside the lock; PBKDF2 is the expensive part.
        let digest_origin = new.verifier.digest_origin();
        let verifier = self.derive_verifier(new.verifier, new.mechanism)?;

        let identity = Identity {
            id: Uuid::new_v4(),
            name: new.name,
            scope: new.scope,
            verifier,
            mechanism: new.mechanism,
            digest_origin,
            roles: new.roles,
            administrative: false,
        };
        self.insert_new(identity)
    }

    /// Trusted out-of-band creation of the single administrative identity.
    pub fn install_admin(
        &self,
        name: &str,
        password: SecretString,
        mechanism: Mechanism,
    ) -> Result<Identity, StoreError> {
        validate_key(name, ADMIN_SCOPE)?;
        if self.admin().is_some() {
            return Err(StoreError::AdminExists);
        }
        let verifier = self.derive_verifier(VerifierInput::Plaintext(password), mechanism)?;
        let identity = Identity {
            id: Uuid::new_v4(),
            name: name.to_string(),
            scope: ADMIN_SCOPE.to_string(),
            verifier,
            mechanism,
            digest_origin: DigestOrigin::ServerComputed,
            roles: BTreeSet::from([Role::new(Permission::Root, ANY_SCOPE)]),
            administrative: true,
        };

        let mut records = self.records.write();
        if records.values().any(|i| i.administrative) {
            return Err(StoreError::AdminExists);
        }
        insert_persisted(&mut records, identity, |r| self.persist(r))
    }

    pub fn lookup(&self, name: &str, scope: &str) -> Result<Identity, StoreError> {
        self.records
            .read()
            .get(&key(name, scope))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
                scope: scope.to_string(),
            })
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Identity, StoreError> {
        self.records
            .read()
            .values()
            .find(|i| i.id == id)
            .cloned()
            .ok_or(StoreError::IdNotFound(id))
    }

    pub fn admin(&self) -> Option<Identity> {
        self.records
            .read()
            .values()
            .find(|i| i.administrative)
            .cloned()
    }

    /// Removes an identity. The administrative identity cannot be revoked.
    pub fn revoke(&self, name: &str, scope: &str) -> Result<Identity, StoreError> {
        let mut records = self.records.write();
        let k = key(name, scope);
        let removed = records.remove(&k).ok_or_else(|| StoreError::NotFound {
            name: name.to_string(),
            scope: scope.to_string(),
        })?;
        if removed.administrative {
            records.insert(k, removed);
            return Err(StoreError::InvalidIdentity(
                "the administrative identity cannot be revoked".into(),
            ));
        }
        if let Err(e) = self.persist(&records) {
            records.insert(k, removed);
            return Err(e);
        }
        info!("Revoked identity {}@{}", name, scope);
        Ok(removed)
    }

    /// Replaces the verifier of an existing identity.
    pub fn update_verifier(
        &self,
        name: &str,
        scope: &str,
        input: VerifierInput,
    ) -> Result<Identity, StoreError> {
        let mechanism = self.lookup(name, scope)?.mechanism;
        let digest_origin = input.digest_origin();
        let verifier = self.derive_verifier(input, mechanism)?;
        self.modify(name, scope, |identity| {
            identity.verifier = verifier;
            identity.digest_origin = digest_origin;
            Ok(())
        })
    }

    /// Replaces the role set of an existing identity.
    pub fn set_roles(
        &self,
        name: &str,
        scope: &str,
        roles: BTreeSet<Role>,
    ) -> Result<Identity, StoreError> {
        validate_roles(&roles, scope)?;
        self.modify(name, scope, |identity| {
            if identity.administrative {
                return Err(StoreError::InvalidIdentity(
                    "administrative roles are fixed".into(),
                ));
            }
            identity.roles = roles;
            Ok(())
        })
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_new(&self, identity: Identity) -> Result<Identity, StoreError> {
        let mut records = self.records.write();
        if records.contains_key(&key(&identity.name, &identity.scope)) {
            return Err(StoreError::DuplicateIdentity {
                name: identity.name,
                scope: identity.scope,
            });
        }
        let created = insert_persisted(&mut records, identity, |r| self.persist(r))?;
        debug!("Created identity {}@{}", created.name, created.scope);
        Ok(created)
    }

    /// Read-modify-write under the write lock; rolled back if persisting fails.
    fn modify<F>(&self, name: &str, scope: &str, change: F) -> Result<Identity, StoreError>
    where
        F: FnOnce(&mut Identity) -> Result<(), StoreError>,
    {
        let mut records = self.records.write();
        let k = key(name, scope);
        let previous = records.get(&k).cloned().ok_or_else(|| StoreError::NotFound {
            name: name.to_string(),
            scope: scope.to_string(),
        })?;

        let mut updated = previous.clone();
        change(&mut updated)?;
        records.insert(k.clone(), updated.clone());
        if let Err(e) = self.persist(&records) {
            records.insert(k, previous);
            return Err(e);
        }
        Ok(updated)
    }

    fn derive_verifier(&self, input: VerifierInput, mechanism: Mechanism) -> Result<String, StoreError> {
        match input {
            VerifierInput::Plaintext(password) => {
                let verifier = ScramVerifier::generate(mechanism, &password, self.bounds.min(), &self.rng)
                    .map_err(|_| StoreError::RandomUnavailable)?;
                // `password` drops here; only the one-way verifier survives.
                Ok(verifier.to_string())
            }
            VerifierInput::Precomputed(text) => {
                let parsed: ScramVerifier = text
                    .parse()
                    .map_err(|e: crate::error::MechanismError| StoreError::MalformedVerifier(e.to_string()))?;
                self.bounds
                    .check(&parsed)
                    .map_err(|e| StoreError::MalformedVerifier(e.to_string()))?;
                if parsed.mechanism != mechanism {
                    return Err(StoreError::MalformedVerifier(format!(
                        "verifier is {} but identity uses {}",
                        parsed.mechanism, mechanism
                    )));
                }
                Ok(text)
            }
        }
    }

    fn persist(&self, records: &HashMap<IdentityKey, Identity>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut identities: Vec<Identity> = records.values().cloned().collect();
        identities.sort_by(|a, b| (&a.scope, &a.name).cmp(&(&b.scope, &b.name)));
        let bytes = serde_json::to_vec_pretty(&Snapshot {
            version: SNAPSHOT_VERSION,
            identities,
        })?;

        let tmp = path.with_extension("tmp");
        let result = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();
        if let Err(e) = result {
            warn!("Failed to persist credential store to {}: {}", path.display(), e);
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io(e));
        }
        Ok(())
    }
}

fn insert_persisted<P>(
    records: &mut HashMap<IdentityKey, Identity>,
    identity: Identity,
    persist: P,
) -> Result<Identity, StoreError>
where
    P: FnOnce(&HashMap<IdentityKey, Identity>) -> Result<(), StoreError>,
{
    let k = key(&identity.name, &identity.scope);
    records.insert(k.clone(), identity.clone());
    if let Err(e) = persist(records) {
        records.remove(&k);
        return Err(e);
    }
    Ok(identity)
}

fn validate_key(name: &str, scope: &str) -> Result<(), StoreError> {
    let valid = |s: &str| {
        !s.trim().is_empty()
            && s.len() <= MAX_NAME_LENGTH
            && !s.chars().any(|c| c.is_control() || c.is_whitespace())
    };
    if !valid(name) {
        return Err(StoreError::InvalidIdentity(format!("invalid name '{name}'")));
    }
    if !valid(scope) || scope == ANY_SCOPE || scope.contains('@') {
        return Err(StoreError::InvalidIdentity(format!("invalid scope '{scope}'")));
    }
    Ok(())
}

/// Application identities hold roles in their own scope only.
fn validate_roles(roles: &BTreeSet<Role>, scope: &str) -> Result<(), StoreError> {
    match roles.iter().find(|r| r.scope != scope) {
        Some(role) => Err(StoreError::InvalidRole(format!(
            "role {role} is outside scope {scope}"
        ))),
        None => Ok(()),
    }
}
