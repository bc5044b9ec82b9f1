//! Deterministic nonce construction for the message ratchet
//!
//! Each message key encrypts exactly one message, so the nonce only has to
//! be unique per key, not globally. Deriving it from the message number
//! keeps envelopes reproducible after a crash and removes the need for a
//! random source on the send path.

/// ChaCha20-Poly1305 nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Build a 12-byte nonce from a message number.
///
/// Structure:
/// - bytes 0-7: zero padding
/// - bytes 8-11: message number (big-endian)
pub fn message_nonce(message_number: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[8..12].copy_from_slice(&message_number.to_be_bytes());
    nonce
}
