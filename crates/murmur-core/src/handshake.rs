//! X3DH-style asynchronous handshake
//!
//! Establishes a shared 32-byte root secret between an initiator holding a
//! peer's published [`KeyBundle`] and a responder holding the matching
//! private keys, without the responder being online. The derivation combines
//! three Diffie-Hellman exchanges (identity/signed-prekey, ephemeral/identity,
//! ephemeral/signed-prekey) plus a fourth against a one-time prekey when the
//! bundle carries one.
//!
//! The initiator's ephemeral public key and the prekey ids it used travel to
//! the responder inside a [`HandshakeHeader`] attached to the first message
//! envelope; there is no separate handshake round trip.

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

use murmur_crypto::{CipherSuite, CryptoError};

use crate::error::SessionError;
use crate::keys::{IdentityKeyPair, KeyManager, SignedPreKey};

/// Domain separation label for the root secret derivation
const ROOT_LABEL: &[u8] = b"murmur-x3dh-root-v1";

/// Published key material for one account, fetched by initiators.
///
/// Everything here is public; the signature lets the initiator confirm the
/// signed prekey was vouched for by the bundle's verification key before
/// any secret is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBundle {
    /// Cipher suite the bundle's keys belong to
    pub suite_id: u16,
    /// Long-lived identity public key
    pub identity_public: Vec<u8>,
    /// Identifier of the signed prekey below
    pub signed_prekey_id: u32,
    /// Medium-term signed prekey public key
    pub signed_prekey_public: Vec<u8>,
    /// Signature over `signed_prekey_public` by the account's signing key
    pub signed_prekey_signature: Vec<u8>,
    /// Identifier of the one-time prekey, absent when the pool was empty
    pub one_time_prekey_id: Option<u32>,
    /// Single-use prekey public key, present iff the id is
    pub one_time_prekey_public: Option<Vec<u8>>,
    /// Public key verifying the signed prekey signature
    pub verifying_key: Vec<u8>,
}

/// Handshake parameters carried on the first envelope of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeHeader {
    /// Initiator's ephemeral public key
    pub ephemeral_public: Vec<u8>,
    /// Which of the responder's signed prekeys the initiator used
    pub signed_prekey_id: u32,
    /// Which one-time prekey was consumed, if any
    pub one_time_prekey_id: Option<u32>,
}

/// Initiator-side handshake output.
pub struct InitiatorHandshake<S: CipherSuite> {
    /// Shared root secret
    pub root_key: S::SymmetricKey,
    /// Header to attach to the session's first envelope
    pub header: HandshakeHeader,
    /// Responder's signed prekey public, the peer ratchet key the first
    /// ratchet step runs against
    pub peer_signed_prekey_public: S::DhPublic,
}

/// Run the initiator side against a fetched bundle.
///
/// Verifies the bundle's prekey signature before touching any secret;
/// a bad signature aborts with [`SessionError::InvalidSignature`] and
/// nothing is derived. A bundle without a one-time prekey is accepted
/// with the reduced three-exchange derivation.
pub fn initiate<S: CipherSuite>(
    identity: &IdentityKeyPair<S>,
    bundle: &KeyBundle,
) -> Result<InitiatorHandshake<S>, SessionError> {
    if bundle.suite_id != S::SUITE_ID {
        return Err(SessionError::SuiteMismatch { expected: S::SUITE_ID, actual: bundle.suite_id });
    }

    let verifying_key = match S::verifying_key_from_bytes(&bundle.verifying_key) {
        Ok(key) => key,
        Err(CryptoError::VerificationFailed) => return Err(SessionError::InvalidSignature),
        Err(e) => return Err(e.into()),
    };
    let peer_signed_prekey = S::dh_public_from_bytes(&bundle.signed_prekey_public)?;
    let peer_identity = S::dh_public_from_bytes(&bundle.identity_public)?;

    match S::verify(&verifying_key, &bundle.signed_prekey_public, &bundle.signed_prekey_signature) {
        Ok(()) => {}
        Err(CryptoError::VerificationFailed) => return Err(SessionError::InvalidSignature),
        Err(e) => return Err(e.into()),
    }

    let (ephemeral_private, ephemeral_public) = S::generate_dh_keypair()?;

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(&S::dh_agree(&identity.private, &peer_signed_prekey)?);
    ikm.extend_from_slice(&S::dh_agree(&ephemeral_private, &peer_identity)?);
    ikm.extend_from_slice(&S::dh_agree(&ephemeral_private, &peer_signed_prekey)?);

    if let Some(one_time_public) = &bundle.one_time_prekey_public {
        let peer_one_time = S::dh_public_from_bytes(one_time_public)?;
        ikm.extend_from_slice(&S::dh_agree(&ephemeral_private, &peer_one_time)?);
    }

    let root_key = derive_root::<S>(&mut ikm)?;

    debug!(
        signed_prekey_id = bundle.signed_prekey_id,
        one_time_prekey_id = ?bundle.one_time_prekey_id,
        "initiated handshake"
    );

    Ok(InitiatorHandshake {
        root_key,
        header: HandshakeHeader {
            ephemeral_public: ephemeral_public.as_ref().to_vec(),
            signed_prekey_id: bundle.signed_prekey_id,
            one_time_prekey_id: bundle.one_time_prekey_id,
        },
        peer_signed_prekey_public: peer_signed_prekey,
    })
}

/// Run the responder side from a received handshake header.
///
/// Looks up the named signed prekey (current or grace) and consumes the
/// named one-time prekey; an id the responder no longer holds is rejected,
/// since no matching secret can be derived. Returns the root secret and
/// the signed prekey pair the session's receiving ratchet starts from.
pub fn respond<S: CipherSuite>(
    keys: &mut KeyManager<S>,
    initiator_identity_public: &[u8],
    header: &HandshakeHeader,
) -> Result<(S::SymmetricKey, SignedPreKey<S>), SessionError> {
    let peer_identity = S::dh_public_from_bytes(initiator_identity_public)?;
    let peer_ephemeral = S::dh_public_from_bytes(&header.ephemeral_public)?;

    let signed_prekey = keys
        .signed_prekey(header.signed_prekey_id)
        .ok_or(SessionError::UnknownSignedPreKey { key_id: header.signed_prekey_id })?
        .clone();

    // Consume the one-time prekey last so a parse failure above leaves the
    // pool untouched. The take itself is the single-use barrier: a second
    // handshake naming the same id finds nothing.
    let one_time = header
        .one_time_prekey_id
        .map(|key_id| {
            keys.take_one_time_prekey(key_id)
                .ok_or(SessionError::UnknownOneTimePreKey { key_id })
        })
        .transpose()?;

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(&S::dh_agree(&signed_prekey.private, &peer_identity)?);
    ikm.extend_from_slice(&S::dh_agree(&keys.identity().private, &peer_ephemeral)?);
    ikm.extend_from_slice(&S::dh_agree(&signed_prekey.private, &peer_ephemeral)?);

    if let Some(one_time) = one_time {
        ikm.extend_from_slice(&S::dh_agree(&one_time.private, &peer_ephemeral)?);
    }

    let root_key = derive_root::<S>(&mut ikm)?;

    debug!(
        signed_prekey_id = header.signed_prekey_id,
        one_time_prekey_id = ?header.one_time_prekey_id,
        "responded to handshake"
    );

    Ok((root_key, signed_prekey))
}

fn derive_root<S: CipherSuite>(ikm: &mut Vec<u8>) -> Result<S::SymmetricKey, SessionError> {
    let mut okm = S::kdf(ikm, ROOT_LABEL, 32)?;
    ikm.zeroize();
    let root_key = S::symmetric_key_from_bytes(&okm)?;
    okm.zeroize();
    Ok(root_key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use murmur_crypto::ClassicSuite;

    fn responder() -> KeyManager<ClassicSuite> {
        KeyManager::generate().unwrap()
    }

    fn initiator_identity() -> IdentityKeyPair<ClassicSuite> {
        let (private, public) = ClassicSuite::generate_dh_keypair().unwrap();
        IdentityKeyPair { private, public }
    }

    #[test]
    fn both_sides_derive_the_same_root_key() {
        let mut bob = responder();
        let bundle = bob.publish_bundle();
        let alice = initiator_identity();

        let handshake = initiate::<ClassicSuite>(&alice, &bundle).unwrap();
        let (bob_root, _) =
            respond::<ClassicSuite>(&mut bob, alice.public.as_ref(), &handshake.header).unwrap();

        assert_eq!(handshake.root_key, bob_root);
    }

    #[test]
    fn agreement_without_one_time_prekey() {
        let mut bob = responder();
        let mut bundle = bob.publish_bundle();
        bundle.one_time_prekey_id = None;
        bundle.one_time_prekey_public = None;
        let alice = initiator_identity();

        let handshake = initiate::<ClassicSuite>(&alice, &bundle).unwrap();
        assert_eq!(handshake.header.one_time_prekey_id, None);

        let (bob_root, _) =
            respond::<ClassicSuite>(&mut bob, alice.public.as_ref(), &handshake.header).unwrap();
        assert_eq!(handshake.root_key, bob_root);
    }

    #[test]
    fn tampered_prekey_signature_aborts_before_derivation() {
        let mut bob = responder();
        let mut bundle = bob.publish_bundle();
        bundle.signed_prekey_signature[0] ^= 0x01;
        let alice = initiator_identity();

        let result = initiate::<ClassicSuite>(&alice, &bundle);
        assert!(matches!(result, Err(SessionError::InvalidSignature)));
    }

    #[test]
    fn substituted_prekey_fails_verification() {
        let mut bob = responder();
        let mut bundle = bob.publish_bundle();

        // Swap in an attacker prekey without a matching signature
        let (_, attacker_public) = ClassicSuite::generate_dh_keypair().unwrap();
        bundle.signed_prekey_public = attacker_public;

        let result = initiate::<ClassicSuite>(&initiator_identity(), &bundle);
        assert!(matches!(result, Err(SessionError::InvalidSignature)));
    }

    #[test]
    fn responder_rejects_consumed_one_time_prekey() {
        let mut bob = responder();
        let bundle = bob.publish_bundle();
        let alice = initiator_identity();

        let handshake = initiate::<ClassicSuite>(&alice, &bundle).unwrap();
        respond::<ClassicSuite>(&mut bob, alice.public.as_ref(), &handshake.header).unwrap();

        // Replaying the same header finds the one-time prekey gone
        let replay = respond::<ClassicSuite>(&mut bob, alice.public.as_ref(), &handshake.header);
        let expected = handshake.header.one_time_prekey_id.unwrap();
        assert!(
            matches!(replay, Err(SessionError::UnknownOneTimePreKey { key_id }) if key_id == expected)
        );
    }

    #[test]
    fn responder_rejects_unknown_signed_prekey() {
        let mut bob = responder();
        let bundle = bob.publish_bundle();
        let alice = initiator_identity();

        let mut handshake = initiate::<ClassicSuite>(&alice, &bundle).unwrap();
        handshake.header.signed_prekey_id = 77;

        let result = respond::<ClassicSuite>(&mut bob, alice.public.as_ref(), &handshake.header);
        assert!(matches!(result, Err(SessionError::UnknownSignedPreKey { key_id: 77 })));
    }

    #[test]
    fn grace_signed_prekey_still_completes_handshake() {
        let mut bob = responder();
        let bundle = bob.publish_bundle();
        let alice = initiator_identity();

        let handshake = initiate::<ClassicSuite>(&alice, &bundle).unwrap();

        // Bob rotates after Alice fetched the bundle but before her first
        // message arrives; the grace pair must still resolve
        bob.rotate_signed_prekey().unwrap();

        let (bob_root, _) =
            respond::<ClassicSuite>(&mut bob, alice.public.as_ref(), &handshake.header).unwrap();
        assert_eq!(handshake.root_key, bob_root);
    }

    #[test]
    fn foreign_suite_bundle_is_rejected() {
        let mut bob = responder();
        let mut bundle = bob.publish_bundle();
        bundle.suite_id = 7;

        let result = initiate::<ClassicSuite>(&initiator_identity(), &bundle);
        assert!(matches!(result, Err(SessionError::SuiteMismatch { expected: 1, actual: 7 })));
    }
}
