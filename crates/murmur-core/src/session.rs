//! Session orchestration
//!
//! [`SessionManager`] ties the key manager, handshake, ratchet engine, and
//! storage together behind one per-account facade. It owns the only locks
//! in the crate and enforces the crash-consistency discipline: every
//! mutation runs on a working copy, is persisted, and only then committed
//! to memory, so a failed storage write leaves the in-memory state exactly
//! where it was and the caller sees [`SessionError::Persistence`].
//!
//! Sessions load lazily: a contact's ratchet state is read from storage on
//! first use and cached for the life of the manager.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use murmur_crypto::CipherSuite;

use crate::error::SessionError;
use crate::handshake::{self, KeyBundle};
use crate::keys::{KeyManager, ONE_TIME_PREKEY_BATCH};
use crate::ratchet::{Envelope, RatchetState};
use crate::storage::Storage;

/// Pool level at which publishing a bundle also replenishes the pool
pub const ONE_TIME_PREKEY_LOW_WATER: usize = 5;

/// Per-account session facade.
///
/// Cheap to share behind an `Arc`; all methods take `&self` and serialize
/// access through internal locks (sessions and keys, acquired in that
/// order where both are needed).
pub struct SessionManager<S: CipherSuite, St: Storage> {
    user_id: String,
    storage: St,
    keys: Mutex<KeyManager<S>>,
    sessions: Mutex<HashMap<String, RatchetState<S>>>,
}

impl<S: CipherSuite, St: Storage> SessionManager<S, St> {
    /// Open the account in `storage`, generating fresh key material on
    /// first use and persisting it before returning.
    pub fn new(user_id: impl Into<String>, storage: St) -> Result<Self, SessionError> {
        let user_id = user_id.into();

        let keys = match storage.load_key_record(&user_id)? {
            Some(record) => {
                debug!(user_id = %user_id, "restored key material from storage");
                KeyManager::from_record(&record)?
            }
            None => {
                let manager = KeyManager::generate()?;
                storage.store_key_record(&user_id, &manager.to_record())?;
                info!(user_id = %user_id, "generated fresh account key material");
                manager
            }
        };

        Ok(Self { user_id, storage, keys: Mutex::new(keys), sessions: Mutex::new(HashMap::new()) })
    }

    /// Account identifier this manager was opened with.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // A poisoned lock means another thread panicked mid-operation. The
    // working-copy discipline keeps the guarded state coherent at every
    // commit point, so continuing with the recovered value is sound.
    fn lock_keys(&self) -> MutexGuard<'_, KeyManager<S>> {
        match self.keys.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, RatchetState<S>>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Produce a publishable key bundle, consuming one one-time prekey.
    ///
    /// Replenishes the pool when it has run low, and persists the mutated
    /// key record before the bundle is released so a crash cannot reissue
    /// the consumed prekey. On a failed write the pool is rolled back and
    /// no bundle is returned.
    pub fn publish_bundle(&self) -> Result<KeyBundle, SessionError> {
        let mut keys = self.lock_keys();
        let snapshot = keys.to_record();

        let bundle = match Self::build_bundle(&mut keys) {
            Ok(bundle) => bundle,
            Err(e) => {
                *keys = KeyManager::from_record(&snapshot)?;
                return Err(e);
            }
        };

        if let Err(e) = self.storage.store_key_record(&self.user_id, &keys.to_record()) {
            *keys = KeyManager::from_record(&snapshot)?;
            return Err(e.into());
        }

        Ok(bundle)
    }

    fn build_bundle(keys: &mut KeyManager<S>) -> Result<KeyBundle, SessionError> {
        if keys.one_time_prekeys_remaining() <= ONE_TIME_PREKEY_LOW_WATER {
            keys.replenish_one_time_prekeys(ONE_TIME_PREKEY_BATCH)?;
        }
        Ok(keys.publish_bundle())
    }

    /// Rotate the signed prekey, keeping the outgoing pair for handshakes
    /// already in flight. Returns the new key id.
    pub fn rotate_signed_prekey(&self) -> Result<u32, SessionError> {
        let mut keys = self.lock_keys();
        let snapshot = keys.to_record();

        let key_id = match keys.rotate_signed_prekey() {
            Ok(key_id) => key_id,
            Err(e) => {
                *keys = KeyManager::from_record(&snapshot)?;
                return Err(e);
            }
        };

        if let Err(e) = self.storage.store_key_record(&self.user_id, &keys.to_record()) {
            *keys = KeyManager::from_record(&snapshot)?;
            return Err(e.into());
        }

        info!(key_id, "rotated signed prekey");
        Ok(key_id)
    }

    /// Remaining one-time prekeys in the local pool.
    pub fn one_time_prekeys_remaining(&self) -> usize {
        self.lock_keys().one_time_prekeys_remaining()
    }

    /// Initiate a session with `contact_id` from their published bundle.
    ///
    /// If a session already exists (cached or persisted) it is left
    /// untouched, so racing establishes cannot diverge into two ratchets.
    pub fn establish_session(
        &self,
        contact_id: &str,
        peer_bundle: &KeyBundle,
    ) -> Result<(), SessionError> {
        let mut sessions = self.lock_sessions();
        if self.ensure_loaded(&mut sessions, contact_id)? {
            debug!(contact_id, "session already established; leaving it untouched");
            return Ok(());
        }

        let outcome = {
            let keys = self.lock_keys();
            handshake::initiate::<S>(keys.identity(), peer_bundle)?
        };
        let state = RatchetState::new_initiator(
            &outcome.root_key,
            outcome.peer_signed_prekey_public,
            outcome.header,
        )?;

        self.storage.store_session(&self.user_id, contact_id, &state.to_record())?;
        sessions.insert(contact_id.to_string(), state);

        info!(contact_id, "established session as initiator");
        Ok(())
    }

    /// Responder path: accept the first message of a new session.
    ///
    /// Re-runs the handshake from the envelope's header against this
    /// account's prekeys (consuming the named one-time prekey), seeds the
    /// ratchet, and decrypts the first message in the same call. The key
    /// record is persisted before the session so a crash between the two
    /// writes can never resurrect the consumed one-time prekey. Once the
    /// key record has landed the consumption is final: a failed session
    /// write keeps the in-memory pool in step with storage and the
    /// initiator has to handshake again from a fresh bundle.
    ///
    /// If a session with the contact already exists the envelope goes
    /// through the ordinary decrypt path instead (redelivery of the first
    /// message, or both peers racing to initiate).
    pub fn receive_first_message(
        &self,
        contact_id: &str,
        peer_bundle: &KeyBundle,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, SessionError> {
        let mut sessions = self.lock_sessions();
        if self.ensure_loaded(&mut sessions, contact_id)? {
            debug!(contact_id, "session already exists; treating as ordinary envelope");
            return self.decrypt_and_commit(&mut sessions, contact_id, envelope);
        }

        let header = envelope.handshake.as_ref().ok_or(SessionError::MissingHandshake)?;

        let mut keys = self.lock_keys();
        let snapshot = keys.to_record();

        let result = handshake::respond::<S>(&mut keys, &peer_bundle.identity_public, header)
            .and_then(|(root_key, signed_prekey)| {
                let mut state = RatchetState::new_responder(
                    root_key,
                    signed_prekey.private.clone(),
                    signed_prekey.public.clone(),
                );
                let plaintext = state.decrypt(envelope)?;
                Ok((state, plaintext))
            });

        let (state, plaintext) = match result {
            Ok(v) => v,
            Err(e) => {
                *keys = KeyManager::from_record(&snapshot)?;
                return Err(e);
            }
        };

        if let Err(e) = self.storage.store_key_record(&self.user_id, &keys.to_record()) {
            *keys = KeyManager::from_record(&snapshot)?;
            return Err(e.into());
        }

        // The consumed prekey is durable now; rolling the pool back here
        // would leave memory and storage disagreeing about it.
        self.storage.store_session(&self.user_id, contact_id, &state.to_record())?;

        sessions.insert(contact_id.to_string(), state);
        info!(contact_id, "established session as responder");
        Ok(plaintext)
    }

    /// Encrypt a message for an established session.
    ///
    /// The advanced ratchet state is persisted before the envelope is
    /// released, so no observable ciphertext can ever reuse a message
    /// number after crash recovery.
    pub fn encrypt_for(&self, contact_id: &str, plaintext: &[u8]) -> Result<Envelope, SessionError> {
        let mut sessions = self.lock_sessions();
        let state = self.existing_session(&mut sessions, contact_id)?;

        let mut working = state.clone();
        let envelope = working.encrypt(plaintext)?;

        self.storage.store_session(&self.user_id, contact_id, &working.to_record())?;
        *state = working;

        Ok(envelope)
    }

    /// Decrypt an envelope from an established session.
    ///
    /// The advanced state is persisted before the plaintext is released;
    /// a failed decrypt or write leaves the session untouched.
    pub fn decrypt_from(
        &self,
        contact_id: &str,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, SessionError> {
        let mut sessions = self.lock_sessions();
        if !self.ensure_loaded(&mut sessions, contact_id)? {
            return Err(SessionError::NoSessionAvailable { contact_id: contact_id.to_string() });
        }
        self.decrypt_and_commit(&mut sessions, contact_id, envelope)
    }

    /// Tear down the session with a contact, removing cached and persisted
    /// state. Idempotent.
    pub fn reset_session(&self, contact_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.lock_sessions();
        self.storage.delete_session(&self.user_id, contact_id)?;
        sessions.remove(contact_id);
        info!(contact_id, "session reset");
        Ok(())
    }

    fn decrypt_and_commit(
        &self,
        sessions: &mut HashMap<String, RatchetState<S>>,
        contact_id: &str,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, SessionError> {
        let state = self.existing_session(sessions, contact_id)?;

        let mut working = state.clone();
        let plaintext = working.decrypt(envelope)?;

        self.storage.store_session(&self.user_id, contact_id, &working.to_record())?;
        *state = working;

        Ok(plaintext)
    }

    fn existing_session<'a>(
        &self,
        sessions: &'a mut HashMap<String, RatchetState<S>>,
        contact_id: &str,
    ) -> Result<&'a mut RatchetState<S>, SessionError> {
        if !self.ensure_loaded(sessions, contact_id)? {
            return Err(SessionError::NoSessionAvailable { contact_id: contact_id.to_string() });
        }
        sessions
            .get_mut(contact_id)
            .ok_or_else(|| SessionError::NoSessionAvailable { contact_id: contact_id.to_string() })
    }

    /// Pull a persisted session into the cache if not already there.
    /// Returns whether a session for the contact exists.
    fn ensure_loaded(
        &self,
        sessions: &mut HashMap<String, RatchetState<S>>,
        contact_id: &str,
    ) -> Result<bool, SessionError> {
        if sessions.contains_key(contact_id) {
            return Ok(true);
        }
        match self.storage.load_session(&self.user_id, contact_id)? {
            Some(record) => {
                debug!(contact_id, "loaded session from storage");
                sessions.insert(contact_id.to_string(), RatchetState::from_record(&record)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
