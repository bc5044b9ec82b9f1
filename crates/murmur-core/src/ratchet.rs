//! Double-ratchet message engine
//!
//! Every message is sealed under a one-time key two derivation steps away
//! from the session root: a DH ratchet step whenever the conversation
//! direction changes, and a symmetric chain step for every message. Keys
//! for messages that arrive out of order are derived ahead of time and
//! cached until the late message shows up, bounded by [`MAX_SKIP`].
//!
//! [`RatchetState::decrypt`] mutates a working copy and commits it only on
//! success, so a tampered or undecryptable envelope leaves the session
//! exactly as it was.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use zeroize::Zeroize;

use murmur_crypto::{CipherSuite, CryptoError};

use crate::error::SessionError;
use crate::handshake::HandshakeHeader;

/// Hard bound on how far ahead of the receive counter a message number may
/// point. Anything beyond it is rejected before any key is derived.
pub const MAX_SKIP: u32 = 1000;

/// Skipped message keys retained across all chains of one session. Oldest
/// entries are evicted first once the cache is full.
pub const SKIPPED_KEY_CAPACITY: usize = 1000;

/// Wire envelope for one encrypted message.
///
/// The nonce is not carried: it is reconstructed from `message_number`,
/// which is safe because every message key is used exactly once. All header
/// fields are bound into the AEAD associated data, so none can be altered
/// without failing authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Cipher suite that sealed this message
    pub suite_id: u16,
    /// Sender's current ratchet public key
    pub sender_ratchet_public: Vec<u8>,
    /// Position in the sender's current sending chain
    pub message_number: u32,
    /// Length of the sender's previous sending chain
    pub previous_chain_length: u32,
    /// AEAD ciphertext including the authentication tag
    pub ciphertext: Vec<u8>,
    /// Handshake parameters, present until the initiator has heard back
    pub handshake: Option<HandshakeHeader>,
}

impl Envelope {
    /// Encode to CBOR bytes for the transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| SessionError::Encoding { reason: e.to_string() })?;
        Ok(buf)
    }

    /// Decode from CBOR bytes received off the transport.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        ciborium::from_reader(bytes).map_err(|e: ciborium::de::Error<std::io::Error>| {
            SessionError::Encoding { reason: e.to_string() }
        })
    }

    fn associated_data(&self) -> Vec<u8> {
        let mut ad = Vec::with_capacity(2 + self.sender_ratchet_public.len() + 8);
        ad.extend_from_slice(&self.suite_id.to_be_bytes());
        ad.extend_from_slice(&self.sender_ratchet_public);
        ad.extend_from_slice(&self.message_number.to_be_bytes());
        ad.extend_from_slice(&self.previous_chain_length.to_be_bytes());
        ad
    }
}

/// Cache key: the sender ratchet public the chain belonged to, plus the
/// message number within that chain.
type SkippedKeyId = (Vec<u8>, u32);

struct SkippedKeys<S: CipherSuite> {
    keys: HashMap<SkippedKeyId, S::SymmetricKey>,
    order: VecDeque<SkippedKeyId>,
}

impl<S: CipherSuite> SkippedKeys<S> {
    fn new() -> Self {
        Self { keys: HashMap::new(), order: VecDeque::new() }
    }

    fn insert(&mut self, id: SkippedKeyId, key: S::SymmetricKey) {
        if self.keys.len() >= SKIPPED_KEY_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                trace!(message_number = oldest.1, "evicting oldest skipped message key");
                if let Some(mut evicted) = self.keys.remove(&oldest) {
                    evicted.zeroize();
                }
            }
        }
        self.order.push_back(id.clone());
        self.keys.insert(id, key);
    }

    /// Remove and return a cached key. Single use: a second take for the
    /// same id finds nothing.
    fn take(&mut self, id: &SkippedKeyId) -> Option<S::SymmetricKey> {
        let key = self.keys.remove(id)?;
        self.order.retain(|entry| entry != id);
        Some(key)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

impl<S: CipherSuite> Clone for SkippedKeys<S> {
    fn clone(&self) -> Self {
        Self { keys: self.keys.clone(), order: self.order.clone() }
    }
}

impl<S: CipherSuite> Drop for SkippedKeys<S> {
    fn drop(&mut self) {
        for (_, mut key) in self.keys.drain() {
            key.zeroize();
        }
    }
}

/// Per-peer double-ratchet state.
pub struct RatchetState<S: CipherSuite> {
    root_key: S::SymmetricKey,
    dh_private: S::DhPrivate,
    dh_public: S::DhPublic,
    peer_dh_public: Option<S::DhPublic>,
    sending_chain: Option<S::SymmetricKey>,
    receiving_chain: Option<S::SymmetricKey>,
    send_count: u32,
    recv_count: u32,
    previous_send_count: u32,
    skipped: SkippedKeys<S>,
    pending_handshake: Option<HandshakeHeader>,
}

impl<S: CipherSuite> Clone for RatchetState<S> {
    fn clone(&self) -> Self {
        Self {
            root_key: self.root_key.clone(),
            dh_private: self.dh_private.clone(),
            dh_public: self.dh_public.clone(),
            peer_dh_public: self.peer_dh_public.clone(),
            sending_chain: self.sending_chain.clone(),
            receiving_chain: self.receiving_chain.clone(),
            send_count: self.send_count,
            recv_count: self.recv_count,
            previous_send_count: self.previous_send_count,
            skipped: self.skipped.clone(),
            pending_handshake: self.pending_handshake.clone(),
        }
    }
}

impl<S: CipherSuite> Drop for RatchetState<S> {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.dh_private.zeroize();
        if let Some(chain) = &mut self.sending_chain {
            chain.zeroize();
        }
        if let Some(chain) = &mut self.receiving_chain {
            chain.zeroize();
        }
    }
}

impl<S: CipherSuite> RatchetState<S> {
    /// Build the initiator side from a freshly derived handshake root.
    ///
    /// Performs the first DH ratchet step immediately with a fresh key pair
    /// against the peer's signed prekey, so the first envelope already
    /// carries a ratchet key unrelated to the handshake ephemeral. The
    /// handshake header is attached to every outgoing envelope until a
    /// message from the peer proves the session is established.
    pub fn new_initiator(
        root_key: &S::SymmetricKey,
        peer_signed_prekey: S::DhPublic,
        handshake: HandshakeHeader,
    ) -> Result<Self, SessionError> {
        let (dh_private, dh_public) = S::generate_dh_keypair()?;
        let mut dh_output = S::dh_agree(&dh_private, &peer_signed_prekey)?;
        let (root_key, sending_chain) = S::kdf_root(root_key, &dh_output)?;
        dh_output.zeroize();

        Ok(Self {
            root_key,
            dh_private,
            dh_public,
            peer_dh_public: Some(peer_signed_prekey),
            sending_chain: Some(sending_chain),
            receiving_chain: None,
            send_count: 0,
            recv_count: 0,
            previous_send_count: 0,
            skipped: SkippedKeys::new(),
            pending_handshake: Some(handshake),
        })
    }

    /// Build the responder side from a handshake root.
    ///
    /// The ratchet key pair starts as the signed prekey the handshake ran
    /// against; the initiator's first message triggers the DH ratchet step
    /// that replaces it and opens the sending chain. Until then the
    /// responder cannot send.
    pub fn new_responder(
        root_key: S::SymmetricKey,
        dh_private: S::DhPrivate,
        dh_public: S::DhPublic,
    ) -> Self {
        Self {
            root_key,
            dh_private,
            dh_public,
            peer_dh_public: None,
            sending_chain: None,
            receiving_chain: None,
            send_count: 0,
            recv_count: 0,
            previous_send_count: 0,
            skipped: SkippedKeys::new(),
            pending_handshake: None,
        }
    }

    /// Seal a plaintext into the next envelope of the sending chain.
    ///
    /// Advances the chain by one step; the message key is dropped before
    /// returning, so a stolen state cannot re-seal or open this message.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Envelope, SessionError> {
        let chain = self.sending_chain.as_ref().ok_or(SessionError::RatchetNotReady)?;
        let (mut message_key, next_chain) = S::kdf_chain(chain)?;

        let mut envelope = Envelope {
            suite_id: S::SUITE_ID,
            sender_ratchet_public: self.dh_public.as_ref().to_vec(),
            message_number: self.send_count,
            previous_chain_length: self.previous_send_count,
            ciphertext: Vec::new(),
            handshake: self.pending_handshake.clone(),
        };

        let nonce = S::message_nonce(self.send_count);
        envelope.ciphertext =
            S::aead_seal(&message_key, &nonce, plaintext, &envelope.associated_data())?;
        message_key.zeroize();

        self.sending_chain = Some(next_chain);
        self.send_count += 1;

        Ok(envelope)
    }

    /// Open an envelope and advance the receiving state.
    ///
    /// All mutation happens on a working copy that is committed only after
    /// the AEAD tag verifies, so any failure leaves the session unchanged.
    /// Accepts messages out of order within [`MAX_SKIP`]; each cached
    /// skipped key opens exactly one envelope.
    pub fn decrypt(&mut self, envelope: &Envelope) -> Result<Vec<u8>, SessionError> {
        let mut working = self.clone();
        let plaintext = working.decrypt_inner(envelope)?;
        *self = working;
        Ok(plaintext)
    }

    fn decrypt_inner(&mut self, envelope: &Envelope) -> Result<Vec<u8>, SessionError> {
        if envelope.suite_id != S::SUITE_ID {
            return Err(SessionError::SuiteMismatch {
                expected: S::SUITE_ID,
                actual: envelope.suite_id,
            });
        }

        let skipped_id = (envelope.sender_ratchet_public.clone(), envelope.message_number);
        if let Some(mut message_key) = self.skipped.take(&skipped_id) {
            trace!(message_number = envelope.message_number, "opening with cached skipped key");
            let plaintext = Self::open(&message_key, envelope)?;
            message_key.zeroize();
            self.pending_handshake = None;
            return Ok(plaintext);
        }

        let sender_public = S::dh_public_from_bytes(&envelope.sender_ratchet_public)?;
        if self.peer_dh_public.as_ref() != Some(&sender_public) {
            // Direction change: finish the old receiving chain first so its
            // stragglers stay decryptable, then step the DH ratchet.
            if self.receiving_chain.is_some() {
                self.skip_receiving_keys(envelope.previous_chain_length)?;
            }
            self.dh_ratchet(sender_public)?;
        }

        self.skip_receiving_keys(envelope.message_number)?;

        let chain = self.receiving_chain.as_ref().ok_or(SessionError::RatchetNotReady)?;
        let (mut message_key, next_chain) = S::kdf_chain(chain)?;
        self.receiving_chain = Some(next_chain);
        self.recv_count += 1;

        let plaintext = Self::open(&message_key, envelope)?;
        message_key.zeroize();

        // Hearing from the peer proves the handshake landed; stop attaching it
        self.pending_handshake = None;

        Ok(plaintext)
    }

    fn open(message_key: &S::SymmetricKey, envelope: &Envelope) -> Result<Vec<u8>, SessionError> {
        let nonce = S::message_nonce(envelope.message_number);
        match S::aead_open(message_key, &nonce, &envelope.ciphertext, &envelope.associated_data()) {
            Ok(plaintext) => Ok(plaintext),
            Err(CryptoError::AeadAuthentication) => Err(SessionError::DecryptionFailed),
            Err(e) => Err(e.into()),
        }
    }

    /// Derive and cache message keys for positions `recv_count..until` of
    /// the current receiving chain.
    fn skip_receiving_keys(&mut self, until: u32) -> Result<(), SessionError> {
        if until > self.recv_count.saturating_add(MAX_SKIP) {
            return Err(SessionError::ExcessiveSkip {
                current: self.recv_count,
                requested: until,
            });
        }
        if self.recv_count >= until {
            return Ok(());
        }

        let peer = self.peer_dh_public.as_ref().ok_or(SessionError::RatchetNotReady)?;
        let peer_bytes = peer.as_ref().to_vec();
        let mut chain =
            self.receiving_chain.take().ok_or(SessionError::RatchetNotReady)?;

        let skipping = until - self.recv_count;
        debug!(count = skipping, cached = self.skipped.len(), "caching skipped message keys");

        while self.recv_count < until {
            let (message_key, next_chain) = S::kdf_chain(&chain)?;
            self.skipped.insert((peer_bytes.clone(), self.recv_count), message_key);
            chain.zeroize();
            chain = next_chain;
            self.recv_count += 1;
        }

        self.receiving_chain = Some(chain);
        Ok(())
    }

    /// One full DH ratchet step keyed by a new peer ratchet public.
    fn dh_ratchet(&mut self, peer: S::DhPublic) -> Result<(), SessionError> {
        self.previous_send_count = self.send_count;
        self.send_count = 0;
        self.recv_count = 0;

        let mut dh_recv = S::dh_agree(&self.dh_private, &peer)?;
        let (root_key, receiving_chain) = S::kdf_root(&self.root_key, &dh_recv)?;
        dh_recv.zeroize();

        let (dh_private, dh_public) = S::generate_dh_keypair()?;
        let mut dh_send = S::dh_agree(&dh_private, &peer)?;
        let (root_key, sending_chain) = S::kdf_root(&root_key, &dh_send)?;
        dh_send.zeroize();

        self.root_key = root_key;
        self.receiving_chain = Some(receiving_chain);
        self.sending_chain = Some(sending_chain);
        self.dh_private = dh_private;
        self.dh_public = dh_public;
        self.peer_dh_public = Some(peer);

        debug!("advanced DH ratchet");
        Ok(())
    }

    /// Serialize the full state for the storage boundary.
    pub fn to_record(&self) -> SessionRecord {
        let skipped = self
            .skipped
            .order
            .iter()
            .filter_map(|id| {
                self.skipped.keys.get(id).map(|key| SkippedKeyRecord {
                    ratchet_public: id.0.clone(),
                    message_number: id.1,
                    key: key.as_ref().to_vec(),
                })
            })
            .collect();

        SessionRecord {
            suite_id: S::SUITE_ID,
            root_key: self.root_key.as_ref().to_vec(),
            dh_private: self.dh_private.as_ref().to_vec(),
            peer_dh_public: self.peer_dh_public.as_ref().map(|p| p.as_ref().to_vec()),
            sending_chain: self.sending_chain.as_ref().map(|c| c.as_ref().to_vec()),
            receiving_chain: self.receiving_chain.as_ref().map(|c| c.as_ref().to_vec()),
            send_count: self.send_count,
            recv_count: self.recv_count,
            previous_send_count: self.previous_send_count,
            skipped,
            pending_handshake: self.pending_handshake.clone(),
        }
    }

    /// Restore a state from a stored record.
    pub fn from_record(record: &SessionRecord) -> Result<Self, SessionError> {
        if record.suite_id != S::SUITE_ID {
            return Err(SessionError::SuiteMismatch {
                expected: S::SUITE_ID,
                actual: record.suite_id,
            });
        }

        let dh_private = S::dh_private_from_bytes(&record.dh_private)?;
        let dh_public = S::dh_public(&dh_private)?;

        let mut skipped = SkippedKeys::new();
        for entry in &record.skipped {
            skipped.insert(
                (entry.ratchet_public.clone(), entry.message_number),
                S::symmetric_key_from_bytes(&entry.key)?,
            );
        }

        Ok(Self {
            root_key: S::symmetric_key_from_bytes(&record.root_key)?,
            dh_private,
            dh_public,
            peer_dh_public: record
                .peer_dh_public
                .as_deref()
                .map(S::dh_public_from_bytes)
                .transpose()?,
            sending_chain: record
                .sending_chain
                .as_deref()
                .map(S::symmetric_key_from_bytes)
                .transpose()?,
            receiving_chain: record
                .receiving_chain
                .as_deref()
                .map(S::symmetric_key_from_bytes)
                .transpose()?,
            send_count: record.send_count,
            recv_count: record.recv_count,
            previous_send_count: record.previous_send_count,
            skipped,
            pending_handshake: record.pending_handshake.clone(),
        })
    }
}

/// One cached skipped message key in stored form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedKeyRecord {
    /// Sender ratchet public the key's chain belonged to
    pub ratchet_public: Vec<u8>,
    /// Message number within that chain
    pub message_number: u32,
    /// Derived message key bytes
    pub key: Vec<u8>,
}

/// Serialized ratchet state for one peer session.
///
/// Contains live secrets; encrypting it at rest is the storage layer's
/// concern. Skipped keys are recorded oldest-first so eviction order
/// survives a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Cipher suite this session runs
    pub suite_id: u16,
    /// Current root key bytes
    pub root_key: Vec<u8>,
    /// Current ratchet private key bytes
    pub dh_private: Vec<u8>,
    /// Peer's last seen ratchet public key
    pub peer_dh_public: Option<Vec<u8>>,
    /// Sending chain key bytes, absent before the first send is possible
    pub sending_chain: Option<Vec<u8>>,
    /// Receiving chain key bytes, absent before the first receive
    pub receiving_chain: Option<Vec<u8>>,
    /// Next outgoing message number
    pub send_count: u32,
    /// Next expected incoming message number
    pub recv_count: u32,
    /// Length of the previous sending chain
    pub previous_send_count: u32,
    /// Cached skipped message keys, oldest first
    pub skipped: Vec<SkippedKeyRecord>,
    /// Handshake header still to be attached to outgoing envelopes
    pub pending_handshake: Option<HandshakeHeader>,
}

#[cfg(test)]
impl SessionRecord {
    pub(crate) fn test_fixture() -> Self {
        Self {
            suite_id: 1,
            root_key: vec![1; 32],
            dh_private: vec![2; 32],
            peer_dh_public: Some(vec![3; 32]),
            sending_chain: Some(vec![4; 32]),
            receiving_chain: None,
            send_count: 3,
            recv_count: 0,
            previous_send_count: 0,
            skipped: vec![SkippedKeyRecord {
                ratchet_public: vec![3; 32],
                message_number: 1,
                key: vec![5; 32],
            }],
            pending_handshake: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use murmur_crypto::ClassicSuite;

    use crate::handshake::{self, KeyBundle};
    use crate::keys::{IdentityKeyPair, KeyManager};

    type State = RatchetState<ClassicSuite>;

    struct Pair {
        alice: State,
        bob_keys: KeyManager<ClassicSuite>,
        alice_identity: IdentityKeyPair<ClassicSuite>,
        #[allow(dead_code)]
        bundle: KeyBundle,
    }

    fn setup() -> Pair {
        let mut bob_keys = KeyManager::generate().unwrap();
        let bundle = bob_keys.publish_bundle();

        let (private, public) = ClassicSuite::generate_dh_keypair().unwrap();
        let alice_identity = IdentityKeyPair { private, public };

        let hs = handshake::initiate::<ClassicSuite>(&alice_identity, &bundle).unwrap();
        let alice =
            State::new_initiator(&hs.root_key, hs.peer_signed_prekey_public, hs.header).unwrap();

        Pair { alice, bob_keys, alice_identity, bundle }
    }

    fn bob_from_first(pair: &mut Pair, first: &Envelope) -> (State, Vec<u8>) {
        let header = first.handshake.as_ref().expect("first envelope carries handshake");
        let (root, spk) = handshake::respond::<ClassicSuite>(
            &mut pair.bob_keys,
            pair.alice_identity.public.as_ref(),
            header,
        )
        .unwrap();
        let mut bob = State::new_responder(root, spk.private.clone(), spk.public.clone());
        let plaintext = bob.decrypt(first).unwrap();
        (bob, plaintext)
    }

    #[test]
    fn first_message_roundtrip() {
        let mut pair = setup();
        let envelope = pair.alice.encrypt(b"hello bob").unwrap();

        assert!(envelope.handshake.is_some());
        let (_, plaintext) = bob_from_first(&mut pair, &envelope);
        assert_eq!(plaintext, b"hello bob");
    }

    #[test]
    fn bidirectional_conversation_ratchets() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"ping").unwrap();
        let (mut bob, _) = bob_from_first(&mut pair, &m1);

        for round in 0u8..4 {
            let reply = bob.encrypt(&[round]).unwrap();
            assert_eq!(pair.alice.decrypt(&reply).unwrap(), vec![round]);

            let next = pair.alice.encrypt(&[round, round]).unwrap();
            assert_eq!(bob.decrypt(&next).unwrap(), vec![round, round]);
        }
    }

    #[test]
    fn handshake_header_attached_until_first_reply() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"one").unwrap();
        let m2 = pair.alice.encrypt(b"two").unwrap();
        assert!(m1.handshake.is_some());
        assert!(m2.handshake.is_some(), "header repeats while unacknowledged");

        let (mut bob, _) = bob_from_first(&mut pair, &m1);
        bob.decrypt(&m2).unwrap();

        let reply = bob.encrypt(b"ack").unwrap();
        assert!(reply.handshake.is_none());
        pair.alice.decrypt(&reply).unwrap();

        let m3 = pair.alice.encrypt(b"three").unwrap();
        assert!(m3.handshake.is_none(), "header dropped once the peer answered");
    }

    #[test]
    fn out_of_order_within_a_chain() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"m1").unwrap();
        let m2 = pair.alice.encrypt(b"m2").unwrap();
        let m3 = pair.alice.encrypt(b"m3").unwrap();

        let (mut bob, _) = bob_from_first(&mut pair, &m1);
        assert_eq!(bob.decrypt(&m3).unwrap(), b"m3");
        assert_eq!(bob.decrypt(&m2).unwrap(), b"m2");
    }

    #[test]
    fn late_message_from_previous_chain() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"m1").unwrap();
        let late = pair.alice.encrypt(b"late").unwrap();

        let (mut bob, _) = bob_from_first(&mut pair, &m1);

        // A full round trip moves both sides to new chains
        let reply = bob.encrypt(b"reply").unwrap();
        pair.alice.decrypt(&reply).unwrap();
        let m3 = pair.alice.encrypt(b"m3").unwrap();
        bob.decrypt(&m3).unwrap();

        // The straggler from the old chain still opens
        assert_eq!(bob.decrypt(&late).unwrap(), b"late");
    }

    #[test]
    fn skipped_key_is_single_use() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"m1").unwrap();
        let m2 = pair.alice.encrypt(b"m2").unwrap();
        let m3 = pair.alice.encrypt(b"m3").unwrap();

        let (mut bob, _) = bob_from_first(&mut pair, &m1);
        bob.decrypt(&m3).unwrap();
        bob.decrypt(&m2).unwrap();

        // Replay of an already-opened skipped message finds no key
        assert!(matches!(bob.decrypt(&m2), Err(SessionError::DecryptionFailed)));
    }

    #[test]
    fn replay_of_current_chain_message_fails() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"m1").unwrap();
        let (mut bob, _) = bob_from_first(&mut pair, &m1);

        assert!(matches!(bob.decrypt(&m1), Err(SessionError::DecryptionFailed)));
    }

    #[test]
    fn tampered_ciphertext_leaves_state_unchanged() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"m1").unwrap();
        let (mut bob, _) = bob_from_first(&mut pair, &m1);

        let good = pair.alice.encrypt(b"good").unwrap();
        let mut bad = good.clone();
        bad.ciphertext[0] ^= 0x01;

        assert!(matches!(bob.decrypt(&bad), Err(SessionError::DecryptionFailed)));
        // The failed attempt must not have consumed the chain position
        assert_eq!(bob.decrypt(&good).unwrap(), b"good");
    }

    #[test]
    fn tampered_header_fails_authentication() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"m1").unwrap();
        let (mut bob, _) = bob_from_first(&mut pair, &m1);

        let good = pair.alice.encrypt(b"good").unwrap();
        let mut bad = good.clone();
        bad.previous_chain_length += 1;

        assert!(matches!(bob.decrypt(&bad), Err(SessionError::DecryptionFailed)));
    }

    #[test]
    fn excessive_skip_is_rejected_without_deriving_keys() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"m1").unwrap();
        let (mut bob, _) = bob_from_first(&mut pair, &m1);

        let mut far = pair.alice.encrypt(b"far").unwrap();
        far.message_number = MAX_SKIP + 2;

        let result = bob.decrypt(&far);
        assert!(matches!(result, Err(SessionError::ExcessiveSkip { current: 1, requested }) if requested == MAX_SKIP + 2));
        assert_eq!(bob.skipped.len(), 0, "no keys may be cached for a rejected skip");
    }

    #[test]
    fn responder_cannot_send_before_first_receive() {
        let bob_keys = KeyManager::<ClassicSuite>::generate().unwrap();
        let signed = bob_keys.current_signed_prekey().clone();
        let root = ClassicSuite::symmetric_key_from_bytes(&[7u8; 32]).unwrap();

        let mut bob = State::new_responder(root, signed.private, signed.public);
        assert!(matches!(bob.encrypt(b"early"), Err(SessionError::RatchetNotReady)));
    }

    #[test]
    fn envelope_bytes_roundtrip() {
        let mut pair = setup();
        let envelope = pair.alice.encrypt(b"wire").unwrap();

        let bytes = envelope.to_bytes().unwrap();
        let decoded = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_rejects_garbage_bytes() {
        let result = Envelope::from_bytes(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(SessionError::Encoding { .. })));
    }

    #[test]
    fn record_roundtrip_resumes_mid_conversation() {
        let mut pair = setup();
        let m1 = pair.alice.encrypt(b"m1").unwrap();
        let m2 = pair.alice.encrypt(b"m2").unwrap();
        let m3 = pair.alice.encrypt(b"m3").unwrap();

        let (mut bob, _) = bob_from_first(&mut pair, &m1);
        bob.decrypt(&m3).unwrap();

        // Restart: serialize, restore, and keep going with the skipped key
        let record = bob.to_record();
        let mut restored = State::from_record(&record).unwrap();
        assert_eq!(restored.decrypt(&m2).unwrap(), b"m2");

        let reply = restored.encrypt(b"reply").unwrap();
        assert_eq!(pair.alice.decrypt(&reply).unwrap(), b"reply");
    }

    #[test]
    fn record_rejects_foreign_suite() {
        let mut record = SessionRecord::test_fixture();
        record.suite_id = 9;
        let result = State::from_record(&record);
        assert!(matches!(result, Err(SessionError::SuiteMismatch { expected: 1, actual: 9 })));
    }

    #[test]
    fn skipped_cache_evicts_oldest_first() {
        let mut cache = SkippedKeys::<ClassicSuite>::new();
        for n in 0..=SKIPPED_KEY_CAPACITY as u32 {
            cache.insert((vec![1; 32], n), vec![0xaa; 32]);
        }

        assert_eq!(cache.len(), SKIPPED_KEY_CAPACITY);
        assert!(cache.take(&(vec![1; 32], 0)).is_none(), "oldest entry must be evicted");
        assert!(cache.take(&(vec![1; 32], 1)).is_some());
    }
}
