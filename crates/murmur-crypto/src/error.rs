//! Error types for primitive suite operations

use thiserror::Error;

/// Errors from cipher suite primitives
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The operating system entropy source failed
    ///
    /// No key generation can proceed; this is fatal at the process level.
    #[error("entropy source failure: {reason}")]
    Entropy {
        /// Description from the underlying RNG
        reason: String,
    },

    /// Key material had the wrong length for this suite
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Signature bytes had the wrong length for this suite
    #[error("invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength {
        /// Expected signature length in bytes
        expected: usize,
        /// Actual signature length in bytes
        actual: usize,
    },

    /// Signature verification failed
    #[error("signature verification failed")]
    VerificationFailed,

    /// AEAD open failed (authentication tag mismatch)
    #[error("aead authentication failed")]
    AeadAuthentication,

    /// Key derivation produced no output for the requested length
    #[error("key derivation failed: {reason}")]
    Derivation {
        /// Reason for the derivation failure
        reason: String,
    },
}

impl CryptoError {
    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Entropy failure means the process cannot generate keys at all.
    /// The remaining variants are per-operation failures: the input was
    /// malformed or forged, and the caller can drop it and continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Entropy { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entropy_is_fatal() {
        let err = CryptoError::Entropy { reason: "rng unavailable".to_string() };
        assert!(err.is_fatal());
    }

    #[test]
    fn verification_failure_is_not_fatal() {
        assert!(!CryptoError::VerificationFailed.is_fatal());
        assert!(!CryptoError::AeadAuthentication.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = CryptoError::InvalidKeyLength { expected: 32, actual: 16 };
        assert_eq!(err.to_string(), "invalid key length: expected 32, got 16");
    }
}
