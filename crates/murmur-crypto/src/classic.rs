//! Classical cipher suite: X25519, Ed25519, ChaCha20-Poly1305, HKDF-SHA256
//!
//! Key material is held in byte vectors so the suite types stay uniform
//! across the trait boundary. Intermediate secrets are zeroized before the
//! buffers are dropped.

use chacha20poly1305::{
    ChaCha20Poly1305, Key, KeyInit, Nonce,
    aead::{Aead, Payload},
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::nonce;
use crate::suite::CipherSuite;

type HmacSha256 = Hmac<Sha256>;

/// X25519 key length in bytes
pub const DH_KEY_LEN: usize = 32;

/// Ed25519 key length in bytes
pub const SIGNING_KEY_LEN: usize = 32;

/// Ed25519 signature length in bytes
pub const SIGNATURE_LEN: usize = 64;

/// Symmetric key length in bytes (ChaCha20 and the KDF chains)
pub const SYMMETRIC_KEY_LEN: usize = 32;

/// Label for mixing a DH output into the root key
const ROOT_LABEL: &[u8] = b"murmur-root-v1";

/// Label for deriving a message key from a chain key
const MESSAGE_LABEL: &[u8] = b"message";

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// The classical primitive suite.
pub struct ClassicSuite;

impl ClassicSuite {
    fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
        let mut bytes = [0u8; N];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::Entropy { reason: e.to_string() })?;
        Ok(bytes)
    }

    fn fixed_key<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CryptoError> {
        bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { expected: N, actual: bytes.len() })
    }

    fn hmac_derive(chain_key: &[u8], label: &[u8]) -> Vec<u8> {
        let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(chain_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        mac.finalize().into_bytes().to_vec()
    }
}

impl CipherSuite for ClassicSuite {
    const SUITE_ID: u16 = 1;

    type DhPublic = Vec<u8>;
    type DhPrivate = Vec<u8>;
    type VerifyingKey = Vec<u8>;
    type SigningKey = Vec<u8>;
    type SymmetricKey = Vec<u8>;

    fn generate_dh_keypair() -> Result<(Self::DhPrivate, Self::DhPublic), CryptoError> {
        let bytes: [u8; DH_KEY_LEN] = Self::random_bytes()?;
        let secret = StaticSecret::from(bytes);
        let public = X25519Public::from(&secret);
        Ok((secret.to_bytes().to_vec(), public.to_bytes().to_vec()))
    }

    fn dh_public(private: &Self::DhPrivate) -> Result<Self::DhPublic, CryptoError> {
        let bytes: [u8; DH_KEY_LEN] = Self::fixed_key(private)?;
        let secret = StaticSecret::from(bytes);
        Ok(X25519Public::from(&secret).to_bytes().to_vec())
    }

    fn dh_public_from_bytes(bytes: &[u8]) -> Result<Self::DhPublic, CryptoError> {
        let key: [u8; DH_KEY_LEN] = Self::fixed_key(bytes)?;
        Ok(key.to_vec())
    }

    fn dh_private_from_bytes(bytes: &[u8]) -> Result<Self::DhPrivate, CryptoError> {
        let key: [u8; DH_KEY_LEN] = Self::fixed_key(bytes)?;
        Ok(key.to_vec())
    }

    fn dh_agree(
        private: &Self::DhPrivate,
        public: &Self::DhPublic,
    ) -> Result<Vec<u8>, CryptoError> {
        let private_bytes: [u8; DH_KEY_LEN] = Self::fixed_key(private)?;
        let public_bytes: [u8; DH_KEY_LEN] = Self::fixed_key(public)?;

        let secret = StaticSecret::from(private_bytes);
        let shared = secret.diffie_hellman(&X25519Public::from(public_bytes));
        Ok(shared.as_bytes().to_vec())
    }

    fn generate_signing_keypair() -> Result<(Self::SigningKey, Self::VerifyingKey), CryptoError> {
        let bytes: [u8; SIGNING_KEY_LEN] = Self::random_bytes()?;
        let signing = SigningKey::from_bytes(&bytes);
        let verifying = signing.verifying_key();
        Ok((signing.to_bytes().to_vec(), verifying.to_bytes().to_vec()))
    }

    fn verifying_key(private: &Self::SigningKey) -> Result<Self::VerifyingKey, CryptoError> {
        let bytes: [u8; SIGNING_KEY_LEN] = Self::fixed_key(private)?;
        let signing = SigningKey::from_bytes(&bytes);
        Ok(signing.verifying_key().to_bytes().to_vec())
    }

    fn verifying_key_from_bytes(bytes: &[u8]) -> Result<Self::VerifyingKey, CryptoError> {
        let key: [u8; SIGNING_KEY_LEN] = Self::fixed_key(bytes)?;
        // Reject points that are not on the curve up front
        VerifyingKey::from_bytes(&key).map_err(|_| CryptoError::VerificationFailed)?;
        Ok(key.to_vec())
    }

    fn signing_key_from_bytes(bytes: &[u8]) -> Result<Self::SigningKey, CryptoError> {
        let key: [u8; SIGNING_KEY_LEN] = Self::fixed_key(bytes)?;
        Ok(key.to_vec())
    }

    fn sign(private: &Self::SigningKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let bytes: [u8; SIGNING_KEY_LEN] = Self::fixed_key(private)?;
        let signing = SigningKey::from_bytes(&bytes);
        Ok(signing.sign(message).to_bytes().to_vec())
    }

    fn verify(
        public: &Self::VerifyingKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let key_bytes: [u8; SIGNING_KEY_LEN] = Self::fixed_key(public)?;
        let verifying =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::VerificationFailed)?;

        let sig_bytes: [u8; SIGNATURE_LEN] =
            signature.try_into().map_err(|_| CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_LEN,
                actual: signature.len(),
            })?;

        verifying
            .verify(message, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| CryptoError::VerificationFailed)
    }

    fn symmetric_key_from_bytes(bytes: &[u8]) -> Result<Self::SymmetricKey, CryptoError> {
        let key: [u8; SYMMETRIC_KEY_LEN] = Self::fixed_key(bytes)?;
        Ok(key.to_vec())
    }

    fn aead_seal(
        key: &Self::SymmetricKey,
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key_bytes: [u8; SYMMETRIC_KEY_LEN] = Self::fixed_key(key)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));

        cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad: associated_data })
            .map_err(|_| CryptoError::AeadAuthentication)
    }

    fn aead_open(
        key: &Self::SymmetricKey,
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key_bytes: [u8; SYMMETRIC_KEY_LEN] = Self::fixed_key(key)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));

        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: associated_data })
            .map_err(|_| CryptoError::AeadAuthentication)
    }

    fn kdf(ikm: &[u8], label: &[u8], len: usize) -> Result<Vec<u8>, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(None, ikm);
        let mut okm = vec![0u8; len];
        hkdf.expand(label, &mut okm)
            .map_err(|e| CryptoError::Derivation { reason: e.to_string() })?;
        Ok(okm)
    }

    fn kdf_root(
        root_key: &Self::SymmetricKey,
        dh_output: &[u8],
    ) -> Result<(Self::SymmetricKey, Self::SymmetricKey), CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(root_key.as_ref()), dh_output);
        let mut okm = [0u8; SYMMETRIC_KEY_LEN * 2];
        hkdf.expand(ROOT_LABEL, &mut okm)
            .map_err(|e| CryptoError::Derivation { reason: e.to_string() })?;

        let new_root_key = okm[..SYMMETRIC_KEY_LEN].to_vec();
        let chain_key = okm[SYMMETRIC_KEY_LEN..].to_vec();
        okm.zeroize();

        Ok((new_root_key, chain_key))
    }

    fn kdf_chain(
        chain_key: &Self::SymmetricKey,
    ) -> Result<(Self::SymmetricKey, Self::SymmetricKey), CryptoError> {
        let message_key = Self::hmac_derive(chain_key, MESSAGE_LABEL);
        let next_chain_key = Self::hmac_derive(chain_key, CHAIN_LABEL);
        Ok((message_key, next_chain_key))
    }

    fn message_nonce(message_number: u32) -> Vec<u8> {
        nonce::message_nonce(message_number).to_vec()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dh_agreement_is_symmetric() {
        let (alice_private, alice_public) = ClassicSuite::generate_dh_keypair().unwrap();
        let (bob_private, bob_public) = ClassicSuite::generate_dh_keypair().unwrap();

        let alice_shared = ClassicSuite::dh_agree(&alice_private, &bob_public).unwrap();
        let bob_shared = ClassicSuite::dh_agree(&bob_private, &alice_public).unwrap();

        assert_eq!(alice_shared, bob_shared, "DH must commute");
        assert_eq!(alice_shared.len(), 32);
    }

    #[test]
    fn dh_public_matches_generated_public() {
        let (private, public) = ClassicSuite::generate_dh_keypair().unwrap();
        assert_eq!(ClassicSuite::dh_public(&private).unwrap(), public);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let (signing, verifying) = ClassicSuite::generate_signing_keypair().unwrap();
        let message = b"prekey bytes";

        let signature = ClassicSuite::sign(&signing, message).unwrap();
        assert_eq!(signature.len(), SIGNATURE_LEN);
        ClassicSuite::verify(&verifying, message, &signature).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let (signing, verifying) = ClassicSuite::generate_signing_keypair().unwrap();
        let signature = ClassicSuite::sign(&signing, b"original").unwrap();

        let result = ClassicSuite::verify(&verifying, b"forged", &signature);
        assert!(matches!(result, Err(CryptoError::VerificationFailed)));
    }

    #[test]
    fn verify_rejects_truncated_signature() {
        let (signing, verifying) = ClassicSuite::generate_signing_keypair().unwrap();
        let signature = ClassicSuite::sign(&signing, b"message").unwrap();

        let result = ClassicSuite::verify(&verifying, b"message", &signature[..32]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidSignatureLength { expected: 64, actual: 32 })
        ));
    }

    #[test]
    fn aead_roundtrip_with_associated_data() {
        let key = vec![7u8; SYMMETRIC_KEY_LEN];
        let nonce = ClassicSuite::message_nonce(3);

        let ciphertext = ClassicSuite::aead_seal(&key, &nonce, b"hello", b"header").unwrap();
        let plaintext = ClassicSuite::aead_open(&key, &nonce, &ciphertext, b"header").unwrap();

        assert_eq!(plaintext, b"hello");
        // plaintext + 16-byte Poly1305 tag
        assert_eq!(ciphertext.len(), 5 + 16);
    }

    #[test]
    fn aead_rejects_tampered_ciphertext() {
        let key = vec![7u8; SYMMETRIC_KEY_LEN];
        let nonce = ClassicSuite::message_nonce(0);

        let mut ciphertext = ClassicSuite::aead_seal(&key, &nonce, b"hello", b"").unwrap();
        ciphertext[0] ^= 0xFF;

        let result = ClassicSuite::aead_open(&key, &nonce, &ciphertext, b"");
        assert!(matches!(result, Err(CryptoError::AeadAuthentication)));
    }

    #[test]
    fn aead_rejects_mismatched_associated_data() {
        let key = vec![7u8; SYMMETRIC_KEY_LEN];
        let nonce = ClassicSuite::message_nonce(0);

        let ciphertext = ClassicSuite::aead_seal(&key, &nonce, b"hello", b"aad-one").unwrap();
        let result = ClassicSuite::aead_open(&key, &nonce, &ciphertext, b"aad-two");

        assert!(matches!(result, Err(CryptoError::AeadAuthentication)));
    }

    #[test]
    fn kdf_root_advances_both_outputs() {
        let root = vec![1u8; SYMMETRIC_KEY_LEN];
        let dh_output = [2u8; 32];

        let (new_root, chain) = ClassicSuite::kdf_root(&root, &dh_output).unwrap();

        assert_eq!(new_root.len(), SYMMETRIC_KEY_LEN);
        assert_eq!(chain.len(), SYMMETRIC_KEY_LEN);
        assert_ne!(new_root, root);
        assert_ne!(new_root, chain);
    }

    #[test]
    fn kdf_root_is_deterministic() {
        let root = vec![1u8; SYMMETRIC_KEY_LEN];
        let first = ClassicSuite::kdf_root(&root, &[2u8; 32]).unwrap();
        let second = ClassicSuite::kdf_root(&root, &[2u8; 32]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn kdf_chain_is_one_way_per_step() {
        let chain = vec![3u8; SYMMETRIC_KEY_LEN];

        let (message_key, next_chain) = ClassicSuite::kdf_chain(&chain).unwrap();
        let (message_key2, _) = ClassicSuite::kdf_chain(&next_chain).unwrap();

        assert_ne!(message_key, next_chain);
        assert_ne!(message_key, message_key2, "each step must yield a fresh message key");
    }

    #[test]
    fn symmetric_key_from_bytes_enforces_length() {
        let result = ClassicSuite::symmetric_key_from_bytes(&[0u8; 16]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }
}
