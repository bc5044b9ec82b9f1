//! Error types for session operations
//!
//! The taxonomy separates per-message failures (drop the message, session
//! stays valid) from operation-fatal failures (persistence, entropy).
//! Secret material never appears in error messages.

use thiserror::Error;

use murmur_crypto::CryptoError;

use crate::storage::StorageError;

/// Errors from handshake, ratchet, and session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Peer bundle's signed-prekey signature failed verification
    ///
    /// The handshake is aborted and no session state is created.
    #[error("invalid signed prekey signature")]
    InvalidSignature,

    /// Bundle or envelope was produced under a different cipher suite
    #[error("cipher suite mismatch: expected {expected}, got {actual}")]
    SuiteMismatch {
        /// Suite identifier this endpoint runs
        expected: u16,
        /// Suite identifier the peer presented
        actual: u16,
    },

    /// Encryption requested for a contact with no established session
    /// and no bundle to start one
    #[error("no session available for contact {contact_id}")]
    NoSessionAvailable {
        /// Contact the caller addressed
        contact_id: String,
    },

    /// AEAD authentication failed (tampering or wrong key)
    ///
    /// The message is dropped; no ratchet state is mutated.
    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    /// Envelope claims a message number beyond the skip bound
    ///
    /// The message is dropped; the session remains usable.
    #[error("excessive skip: at message {current}, envelope claims {requested}")]
    ExcessiveSkip {
        /// Current receiving message number
        current: u32,
        /// Message number the envelope claimed
        requested: u32,
    },

    /// First envelope named a one-time prekey this endpoint no longer holds
    ///
    /// Without the private half no matching root key can be derived.
    #[error("unknown one-time prekey id {key_id}")]
    UnknownOneTimePreKey {
        /// One-time prekey id named by the envelope
        key_id: u32,
    },

    /// First envelope named a signed prekey outside the current-or-grace set
    #[error("unknown signed prekey id {key_id}")]
    UnknownSignedPreKey {
        /// Signed prekey id named by the envelope
        key_id: u32,
    },

    /// First envelope from an unknown contact carried no handshake header
    #[error("first envelope carries no handshake header")]
    MissingHandshake,

    /// Ratchet has no sending chain yet (responder before first receive)
    #[error("ratchet has no sending chain established")]
    RatchetNotReady,

    /// Bundle or envelope failed to encode or decode
    #[error("wire encoding failed: {reason}")]
    Encoding {
        /// Description of the codec failure
        reason: String,
    },

    /// A primitive suite operation failed
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    /// A durable write failed; the in-memory mutation was rolled back
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

impl SessionError {
    /// Returns true if this error is fatal to the operation (unrecoverable
    /// without operator or environment change)
    ///
    /// Per-message protocol failures are not fatal: the offending message
    /// is dropped and the session continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Persistence(_) => true,
            Self::Crypto(inner) => inner.is_fatal(),

            Self::InvalidSignature
            | Self::SuiteMismatch { .. }
            | Self::NoSessionAvailable { .. }
            | Self::DecryptionFailed
            | Self::ExcessiveSkip { .. }
            | Self::UnknownOneTimePreKey { .. }
            | Self::UnknownSignedPreKey { .. }
            | Self::MissingHandshake
            | Self::RatchetNotReady
            | Self::Encoding { .. } => false,
        }
    }
}
