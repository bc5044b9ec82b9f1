//! Property-based tests for the classic cipher suite

#![allow(clippy::unwrap_used)]

use murmur_crypto::{CipherSuite, ClassicSuite, CryptoError};
use proptest::prelude::*;

fn keypair_from(seed: [u8; 32]) -> (Vec<u8>, Vec<u8>) {
    let private = ClassicSuite::dh_private_from_bytes(&seed).unwrap();
    let public = ClassicSuite::dh_public(&private).unwrap();
    (private, public)
}

/// Property: Diffie-Hellman agreement is symmetric for any two key pairs
#[test]
fn prop_dh_agreement_is_symmetric() {
    proptest!(|(a in any::<[u8; 32]>(), b in any::<[u8; 32]>())| {
        let (a_private, a_public) = keypair_from(a);
        let (b_private, b_public) = keypair_from(b);

        let ab = ClassicSuite::dh_agree(&a_private, &b_public).unwrap();
        let ba = ClassicSuite::dh_agree(&b_private, &a_public).unwrap();
        prop_assert_eq!(ab, ba);
    });
}

/// Property: any plaintext and associated data round-trip through the AEAD
#[test]
fn prop_aead_roundtrip() {
    proptest!(|(
        key in any::<[u8; 32]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 0..1024),
        aad in proptest::collection::vec(any::<u8>(), 0..128),
        message_number in any::<u32>(),
    )| {
        let key = ClassicSuite::symmetric_key_from_bytes(&key).unwrap();
        let nonce = ClassicSuite::message_nonce(message_number);

        let sealed = ClassicSuite::aead_seal(&key, &nonce, &plaintext, &aad).unwrap();
        let opened = ClassicSuite::aead_open(&key, &nonce, &sealed, &aad).unwrap();
        prop_assert_eq!(opened, plaintext);
    });
}

/// Property: any change to the associated data is detected
#[test]
fn prop_aead_binds_associated_data() {
    proptest!(|(
        key in any::<[u8; 32]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        aad in proptest::collection::vec(any::<u8>(), 1..64),
        flip in any::<prop::sample::Index>(),
    )| {
        let key = ClassicSuite::symmetric_key_from_bytes(&key).unwrap();
        let nonce = ClassicSuite::message_nonce(0);
        let sealed = ClassicSuite::aead_seal(&key, &nonce, &plaintext, &aad).unwrap();

        let mut tampered = aad.clone();
        let flip_index = flip.index(tampered.len());
        tampered[flip_index] ^= 0x01;

        let result = ClassicSuite::aead_open(&key, &nonce, &sealed, &tampered);
        prop_assert!(matches!(result, Err(CryptoError::AeadAuthentication)));
    });
}

/// Property: the chain KDF is deterministic and never echoes its input
#[test]
fn prop_chain_kdf_deterministic_and_one_way() {
    proptest!(|(chain in any::<[u8; 32]>())| {
        let chain = ClassicSuite::symmetric_key_from_bytes(&chain).unwrap();

        let (message_a, next_a) = ClassicSuite::kdf_chain(&chain).unwrap();
        let (message_b, next_b) = ClassicSuite::kdf_chain(&chain).unwrap();

        prop_assert_eq!(&message_a, &message_b);
        prop_assert_eq!(&next_a, &next_b);
        prop_assert_ne!(&message_a, &chain);
        prop_assert_ne!(&next_a, &chain);
        prop_assert_ne!(&message_a, &next_a);
    });
}

/// Property: signatures verify for the signing key and fail for any other
#[test]
fn prop_signatures_bind_to_key() {
    proptest!(|(
        seed in any::<[u8; 32]>(),
        other_seed in any::<[u8; 32]>(),
        message in proptest::collection::vec(any::<u8>(), 0..512),
    )| {
        prop_assume!(seed != other_seed);

        let signing = ClassicSuite::signing_key_from_bytes(&seed).unwrap();
        let verifying = ClassicSuite::verifying_key(&signing).unwrap();
        let signature = ClassicSuite::sign(&signing, &message).unwrap();

        prop_assert!(ClassicSuite::verify(&verifying, &message, &signature).is_ok());

        let other = ClassicSuite::signing_key_from_bytes(&other_seed).unwrap();
        let other_verifying = ClassicSuite::verifying_key(&other).unwrap();
        prop_assert!(matches!(
            ClassicSuite::verify(&other_verifying, &message, &signature),
            Err(CryptoError::VerificationFailed)
        ));
    });
}

/// Known-answer check for the deterministic nonce layout
#[test]
fn nonce_layout_known_answer() {
    let nonce = ClassicSuite::message_nonce(0x0102_0304);
    assert_eq!(nonce, hex::decode("000000000000000001020304").unwrap());
}
