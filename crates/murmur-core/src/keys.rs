//! Key management: identity, signed prekeys, one-time prekey pool
//!
//! The [`KeyManager`] owns every long-lived private key for one account.
//! Private key bytes leave it only inside a [`KeyRecord`] headed for the
//! storage boundary; nothing here writes storage itself. Callers persist
//! the record after every mutation and roll the manager back from a prior
//! record if the write fails.

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use murmur_crypto::CipherSuite;

use crate::error::SessionError;
use crate::handshake::KeyBundle;

/// One-time prekeys generated per replenishment batch
pub const ONE_TIME_PREKEY_BATCH: usize = 20;

/// Long-lived identity key pair, one per account.
pub struct IdentityKeyPair<S: CipherSuite> {
    /// Private half; exclusive to the key manager
    pub private: S::DhPrivate,
    /// Public half, published in bundles
    pub public: S::DhPublic,
}

/// Signing key pair used to certify signed prekeys.
pub struct SigningKeyPair<S: CipherSuite> {
    /// Private signing key
    pub private: S::SigningKey,
    /// Public verification key, published in bundles
    pub public: S::VerifyingKey,
}

/// Rotatable medium-term prekey, signed by the identity's signing key.
pub struct SignedPreKey<S: CipherSuite> {
    /// Monotonically increasing identifier
    pub key_id: u32,
    /// Private half
    pub private: S::DhPrivate,
    /// Public half, published in bundles
    pub public: S::DhPublic,
    /// Signature over the public half
    pub signature: Vec<u8>,
}

/// Single-use prekey consumed by exactly one handshake.
pub struct OneTimePreKey<S: CipherSuite> {
    /// Unique identifier within this account
    pub key_id: u32,
    /// Private half
    pub private: S::DhPrivate,
    /// Public half, handed out in at most one bundle
    pub public: S::DhPublic,
}

// Manual Clone impls: the suite marker type itself is not Clone, only its
// associated key types are.
impl<S: CipherSuite> Clone for IdentityKeyPair<S> {
    fn clone(&self) -> Self {
        Self { private: self.private.clone(), public: self.public.clone() }
    }
}

impl<S: CipherSuite> Clone for SigningKeyPair<S> {
    fn clone(&self) -> Self {
        Self { private: self.private.clone(), public: self.public.clone() }
    }
}

impl<S: CipherSuite> Clone for SignedPreKey<S> {
    fn clone(&self) -> Self {
        Self {
            key_id: self.key_id,
            private: self.private.clone(),
            public: self.public.clone(),
            signature: self.signature.clone(),
        }
    }
}

impl<S: CipherSuite> Clone for OneTimePreKey<S> {
    fn clone(&self) -> Self {
        Self { key_id: self.key_id, private: self.private.clone(), public: self.public.clone() }
    }
}

/// Owner of all long-term key material for one account.
///
/// # Invariants
///
/// - Exactly one signed prekey is current; at most one previous ("grace")
///   pair is retained for handshakes already in flight
/// - A one-time prekey is removed from the pool the moment it is handed
///   out or consumed, never reused
pub struct KeyManager<S: CipherSuite> {
    identity: IdentityKeyPair<S>,
    signing: SigningKeyPair<S>,
    signed_prekey: SignedPreKey<S>,
    grace_signed_prekey: Option<SignedPreKey<S>>,
    one_time_prekeys: Vec<OneTimePreKey<S>>,
    next_signed_prekey_id: u32,
    next_one_time_prekey_id: u32,
}

impl<S: CipherSuite> Drop for KeyManager<S> {
    fn drop(&mut self) {
        self.identity.private.zeroize();
        self.signing.private.zeroize();
        self.signed_prekey.private.zeroize();
        if let Some(grace) = &mut self.grace_signed_prekey {
            grace.private.zeroize();
        }
        for key in &mut self.one_time_prekeys {
            key.private.zeroize();
        }
    }
}

impl<S: CipherSuite> KeyManager<S> {
    /// Generate a fresh account: identity and signing keys, a first signed
    /// prekey, and an initial one-time prekey pool.
    ///
    /// Called once at account creation. Fails only on entropy-source
    /// failure, which is fatal.
    pub fn generate() -> Result<Self, SessionError> {
        let (identity_private, identity_public) = S::generate_dh_keypair()?;
        let (signing_private, signing_public) = S::generate_signing_keypair()?;

        let signing = SigningKeyPair { private: signing_private, public: signing_public };
        let signed_prekey = Self::new_signed_prekey(&signing, 1)?;

        let mut manager = Self {
            identity: IdentityKeyPair { private: identity_private, public: identity_public },
            signing,
            signed_prekey,
            grace_signed_prekey: None,
            one_time_prekeys: Vec::new(),
            next_signed_prekey_id: 2,
            next_one_time_prekey_id: 1,
        };
        manager.replenish_one_time_prekeys(ONE_TIME_PREKEY_BATCH)?;

        Ok(manager)
    }

    fn new_signed_prekey(
        signing: &SigningKeyPair<S>,
        key_id: u32,
    ) -> Result<SignedPreKey<S>, SessionError> {
        let (private, public) = S::generate_dh_keypair()?;
        let signature = S::sign(&signing.private, public.as_ref())?;
        Ok(SignedPreKey { key_id, private, public, signature })
    }

    /// Identity key pair for this account.
    pub fn identity(&self) -> &IdentityKeyPair<S> {
        &self.identity
    }

    /// Public verification key for this account's prekey signatures.
    pub fn verifying_key(&self) -> &S::VerifyingKey {
        &self.signing.public
    }

    /// Currently published signed prekey.
    pub fn current_signed_prekey(&self) -> &SignedPreKey<S> {
        &self.signed_prekey
    }

    /// Rotate the signed prekey.
    ///
    /// The outgoing pair is retained as the single grace entry so
    /// handshakes already in flight against the old bundle still complete;
    /// whatever held the grace slot before is discarded. Rotating twice in
    /// a row therefore leaves one current and one grace pair, never an
    /// accumulation.
    pub fn rotate_signed_prekey(&mut self) -> Result<u32, SessionError> {
        let key_id = self.next_signed_prekey_id;
        self.next_signed_prekey_id += 1;

        let fresh = Self::new_signed_prekey(&self.signing, key_id)?;
        let outgoing = std::mem::replace(&mut self.signed_prekey, fresh);

        debug!(new_key_id = key_id, grace_key_id = outgoing.key_id, "rotated signed prekey");
        self.grace_signed_prekey = Some(outgoing);

        Ok(key_id)
    }

    /// Look up a signed prekey by id, current or grace.
    pub fn signed_prekey(&self, key_id: u32) -> Option<&SignedPreKey<S>> {
        if self.signed_prekey.key_id == key_id {
            return Some(&self.signed_prekey);
        }
        self.grace_signed_prekey.as_ref().filter(|grace| grace.key_id == key_id)
    }

    /// Generate `count` fresh one-time prekeys, each with a unique id.
    pub fn replenish_one_time_prekeys(&mut self, count: usize) -> Result<(), SessionError> {
        self.one_time_prekeys.reserve(count);
        for _ in 0..count {
            let key_id = self.next_one_time_prekey_id;
            self.next_one_time_prekey_id += 1;

            let (private, public) = S::generate_dh_keypair()?;
            self.one_time_prekeys.push(OneTimePreKey { key_id, private, public });
        }
        debug!(count, remaining = self.one_time_prekeys.len(), "replenished one-time prekeys");
        Ok(())
    }

    /// Remaining one-time prekeys in the pool.
    pub fn one_time_prekeys_remaining(&self) -> usize {
        self.one_time_prekeys.len()
    }

    /// Consume a one-time prekey by id (check-and-delete).
    ///
    /// Returns `None` if the id is unknown or already consumed; at most one
    /// caller ever receives a given pair.
    pub fn take_one_time_prekey(&mut self, key_id: u32) -> Option<OneTimePreKey<S>> {
        let index = self.one_time_prekeys.iter().position(|k| k.key_id == key_id)?;
        Some(self.one_time_prekeys.remove(index))
    }

    /// Build a publishable [`KeyBundle`], popping one one-time prekey from
    /// the pool if any remains.
    ///
    /// An exhausted pool is not an error: the bundle simply ships without a
    /// one-time prekey (reduced guarantee for that handshake only). The
    /// caller must persist the mutated pool before handing the bundle to a
    /// transport, else a crash could reissue the popped prekey.
    pub fn publish_bundle(&mut self) -> KeyBundle {
        let one_time = self.one_time_prekeys.pop();
        if one_time.is_none() {
            debug!("one-time prekey pool exhausted; publishing bundle without one");
        }

        KeyBundle {
            suite_id: S::SUITE_ID,
            identity_public: self.identity.public.as_ref().to_vec(),
            signed_prekey_id: self.signed_prekey.key_id,
            signed_prekey_public: self.signed_prekey.public.as_ref().to_vec(),
            signed_prekey_signature: self.signed_prekey.signature.clone(),
            one_time_prekey_id: one_time.as_ref().map(|k| k.key_id),
            one_time_prekey_public: one_time.map(|k| k.public.as_ref().to_vec()),
            verifying_key: self.signing.public.as_ref().to_vec(),
        }
    }

    /// Serialize all key material for the storage boundary.
    ///
    /// Public halves are re-derived on restore, so the record carries
    /// private bytes only.
    pub fn to_record(&self) -> KeyRecord {
        KeyRecord {
            suite_id: S::SUITE_ID,
            identity_private: self.identity.private.as_ref().to_vec(),
            signing_private: self.signing.private.as_ref().to_vec(),
            signed_prekey: SignedPreKeyRecord::from_key(&self.signed_prekey),
            grace_signed_prekey: self.grace_signed_prekey.as_ref().map(SignedPreKeyRecord::from_key),
            one_time_prekeys: self
                .one_time_prekeys
                .iter()
                .map(|k| OneTimePreKeyRecord {
                    key_id: k.key_id,
                    private: k.private.as_ref().to_vec(),
                })
                .collect(),
            next_signed_prekey_id: self.next_signed_prekey_id,
            next_one_time_prekey_id: self.next_one_time_prekey_id,
        }
    }

    /// Restore a manager from a stored record.
    pub fn from_record(record: &KeyRecord) -> Result<Self, SessionError> {
        if record.suite_id != S::SUITE_ID {
            return Err(SessionError::SuiteMismatch {
                expected: S::SUITE_ID,
                actual: record.suite_id,
            });
        }

        let identity_private = S::dh_private_from_bytes(&record.identity_private)?;
        let identity_public = S::dh_public(&identity_private)?;

        let signing_private = S::signing_key_from_bytes(&record.signing_private)?;
        let signing_public = S::verifying_key(&signing_private)?;

        let one_time_prekeys = record
            .one_time_prekeys
            .iter()
            .map(|r| {
                let private = S::dh_private_from_bytes(&r.private)?;
                let public = S::dh_public(&private)?;
                Ok(OneTimePreKey { key_id: r.key_id, private, public })
            })
            .collect::<Result<Vec<_>, SessionError>>()?;

        Ok(Self {
            identity: IdentityKeyPair { private: identity_private, public: identity_public },
            signing: SigningKeyPair { private: signing_private, public: signing_public },
            signed_prekey: record.signed_prekey.to_key::<S>()?,
            grace_signed_prekey: record
                .grace_signed_prekey
                .as_ref()
                .map(SignedPreKeyRecord::to_key::<S>)
                .transpose()?,
            one_time_prekeys,
            next_signed_prekey_id: record.next_signed_prekey_id,
            next_one_time_prekey_id: record.next_one_time_prekey_id,
        })
    }
}

/// Stored form of a signed prekey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKeyRecord {
    /// Prekey identifier
    pub key_id: u32,
    /// Private key bytes
    pub private: Vec<u8>,
    /// Identity signature over the public half
    pub signature: Vec<u8>,
}

impl SignedPreKeyRecord {
    fn from_key<S: CipherSuite>(key: &SignedPreKey<S>) -> Self {
        Self {
            key_id: key.key_id,
            private: key.private.as_ref().to_vec(),
            signature: key.signature.clone(),
        }
    }

    fn to_key<S: CipherSuite>(&self) -> Result<SignedPreKey<S>, SessionError> {
        let private = S::dh_private_from_bytes(&self.private)?;
        let public = S::dh_public(&private)?;
        Ok(SignedPreKey { key_id: self.key_id, private, public, signature: self.signature.clone() })
    }
}

/// Stored form of a one-time prekey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKeyRecord {
    /// Prekey identifier
    pub key_id: u32,
    /// Private key bytes
    pub private: Vec<u8>,
}

/// Serialized key material for one account.
///
/// Crosses the storage boundary as-is; encrypting the private bytes at
/// rest is the storage layer's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Cipher suite these keys belong to
    pub suite_id: u16,
    /// Identity private key bytes
    pub identity_private: Vec<u8>,
    /// Signing private key bytes
    pub signing_private: Vec<u8>,
    /// Current signed prekey
    pub signed_prekey: SignedPreKeyRecord,
    /// Previous signed prekey retained for in-flight handshakes
    pub grace_signed_prekey: Option<SignedPreKeyRecord>,
    /// Remaining one-time prekey pool
    pub one_time_prekeys: Vec<OneTimePreKeyRecord>,
    /// Next signed prekey id to assign
    pub next_signed_prekey_id: u32,
    /// Next one-time prekey id to assign
    pub next_one_time_prekey_id: u32,
}

#[cfg(test)]
impl KeyRecord {
    pub(crate) fn test_fixture() -> Self {
        Self {
            suite_id: 1,
            identity_private: vec![1; 32],
            signing_private: vec![2; 32],
            signed_prekey: SignedPreKeyRecord {
                key_id: 1,
                private: vec![3; 32],
                signature: vec![4; 64],
            },
            grace_signed_prekey: None,
            one_time_prekeys: vec![OneTimePreKeyRecord { key_id: 1, private: vec![5; 32] }],
            next_signed_prekey_id: 2,
            next_one_time_prekey_id: 2,
        }
    }
}
