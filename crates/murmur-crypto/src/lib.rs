//! Murmur Cryptographic Primitives
//!
//! Primitive suites for the Murmur session protocol. Every operation is a
//! pure function over byte buffers with no global state, which keeps the
//! protocol crates deterministic and testable.
//!
//! # Key Lifecycle
//!
//! An X3DH handshake combines identity, signed-prekey, and one-time-prekey
//! agreements into an initial root key. From there the Double Ratchet derives
//! one-time message keys, advancing the root key on every direction change
//! and the chain key on every message.
//!
//! ```text
//! X3DH Shared Secret
//!        │
//!        ▼
//! HKDF → Root Key
//!        │
//!        ▼
//! kdf_root → Chain Keys (per DH ratchet step)
//!        │
//!        ▼
//! kdf_chain → Message Keys (per message)
//!        │
//!        ▼
//! AEAD Encryption → Ciphertext
//! ```
//!
//! Message keys are used for exactly one seal or open operation and are
//! discarded afterwards, so past messages remain secure even if later state
//! is compromised.
//!
//! # Crypto Agility
//!
//! All primitives sit behind the [`CipherSuite`] trait. The protocol crates
//! are generic over it and never name a concrete algorithm; a future hybrid
//! post-quantum suite only has to implement the trait and claim a new suite
//! identifier. [`ClassicSuite`] is the X25519 / Ed25519 / ChaCha20-Poly1305 /
//! HKDF-SHA256 instantiation.

pub mod classic;
pub mod error;
pub mod nonce;
pub mod suite;

pub use classic::ClassicSuite;
pub use error::CryptoError;
pub use nonce::{NONCE_LEN, message_nonce};
pub use suite::CipherSuite;
