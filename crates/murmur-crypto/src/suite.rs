//! The [`CipherSuite`] capability trait
//!
//! Formalizes every primitive the session protocol needs so the handshake
//! and ratchet logic stay generic over the concrete algorithms. Bundles and
//! envelopes carry [`CipherSuite::SUITE_ID`] so peers with different suite
//! preferences are detected and rejected cleanly instead of failing deep in
//! key derivation.

use core::fmt::Debug;

use zeroize::Zeroize;

use crate::error::CryptoError;

/// Capability interface for one concrete cipher suite.
///
/// All methods are pure functions over byte buffers. Implementations must
/// not hold global state; randomness comes from the OS entropy source and
/// surfaces [`CryptoError::Entropy`] on failure.
pub trait CipherSuite: Send + Sync + 'static {
    /// Wire identifier for this suite, embedded in bundles and envelopes.
    const SUITE_ID: u16;

    /// Public half of a Diffie-Hellman key pair.
    type DhPublic: AsRef<[u8]> + Clone + PartialEq + Eq + Debug + Send + Sync + 'static;
    /// Private half of a Diffie-Hellman key pair. Never serialized in
    /// plaintext; callers route it through an encryption-at-rest boundary.
    type DhPrivate: AsRef<[u8]> + Clone + Zeroize + Send + Sync + 'static;
    /// Public verification key for the signature scheme.
    type VerifyingKey: AsRef<[u8]> + Clone + Debug + Send + Sync + 'static;
    /// Private signing key for the signature scheme.
    type SigningKey: AsRef<[u8]> + Clone + Zeroize + Send + Sync + 'static;
    /// Symmetric key for the AEAD cipher and the KDF chains.
    type SymmetricKey: AsRef<[u8]> + Clone + Zeroize + Send + Sync + 'static;

    /// Generate a fresh Diffie-Hellman key pair from OS entropy.
    fn generate_dh_keypair() -> Result<(Self::DhPrivate, Self::DhPublic), CryptoError>;

    /// Derive the public half from a private Diffie-Hellman key.
    fn dh_public(private: &Self::DhPrivate) -> Result<Self::DhPublic, CryptoError>;

    /// Parse a Diffie-Hellman public key from wire bytes.
    fn dh_public_from_bytes(bytes: &[u8]) -> Result<Self::DhPublic, CryptoError>;

    /// Parse a Diffie-Hellman private key from stored bytes.
    fn dh_private_from_bytes(bytes: &[u8]) -> Result<Self::DhPrivate, CryptoError>;

    /// Compute the shared secret between a local private and remote public
    /// key. The caller owns the output and is responsible for zeroizing it
    /// once derived keys have been extracted.
    fn dh_agree(
        private: &Self::DhPrivate,
        public: &Self::DhPublic,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Generate a fresh signing key pair from OS entropy.
    fn generate_signing_keypair() -> Result<(Self::SigningKey, Self::VerifyingKey), CryptoError>;

    /// Derive the verification key from a signing key.
    fn verifying_key(private: &Self::SigningKey) -> Result<Self::VerifyingKey, CryptoError>;

    /// Parse a verification key from wire bytes.
    fn verifying_key_from_bytes(bytes: &[u8]) -> Result<Self::VerifyingKey, CryptoError>;

    /// Parse a signing key from stored bytes.
    fn signing_key_from_bytes(bytes: &[u8]) -> Result<Self::SigningKey, CryptoError>;

    /// Sign a message, returning the detached signature bytes.
    fn sign(private: &Self::SigningKey, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verify a detached signature over a message.
    ///
    /// # Errors
    ///
    /// [`CryptoError::VerificationFailed`] if the signature does not match.
    fn verify(
        public: &Self::VerifyingKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError>;

    /// Build a symmetric key from derived bytes.
    fn symmetric_key_from_bytes(bytes: &[u8]) -> Result<Self::SymmetricKey, CryptoError>;

    /// AEAD seal. Output ciphertext includes the authentication tag.
    fn aead_seal(
        key: &Self::SymmetricKey,
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// AEAD open.
    ///
    /// # Errors
    ///
    /// [`CryptoError::AeadAuthentication`] on tag mismatch (tampering or
    /// wrong key).
    fn aead_open(
        key: &Self::SymmetricKey,
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// One-shot labeled key derivation over input key material.
    fn kdf(ikm: &[u8], label: &[u8], len: usize) -> Result<Vec<u8>, CryptoError>;

    /// Root-key ratchet step: mix a DH output into the root key, producing
    /// the next root key and a fresh chain key.
    fn kdf_root(
        root_key: &Self::SymmetricKey,
        dh_output: &[u8],
    ) -> Result<(Self::SymmetricKey, Self::SymmetricKey), CryptoError>;

    /// Chain-key ratchet step: derive a one-time message key and the next
    /// chain key. One-way; the chain key cannot be recovered from the
    /// message key.
    fn kdf_chain(
        chain_key: &Self::SymmetricKey,
    ) -> Result<(Self::SymmetricKey, Self::SymmetricKey), CryptoError>;

    /// Deterministic AEAD nonce for a message number.
    ///
    /// Message keys are single-use, so a deterministic nonce is unique per
    /// key without any counter outside the protocol state.
    fn message_nonce(message_number: u32) -> Vec<u8>;
}
