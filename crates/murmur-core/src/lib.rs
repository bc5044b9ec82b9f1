//! End-to-end encrypted session protocol core
//!
//! Sans-IO engine for asynchronous two-party messaging: X3DH-style
//! handshakes over published key bundles, a double-ratchet message layer
//! with out-of-order delivery, and crash-consistent persistence behind a
//! pluggable [`storage::Storage`] trait. Transport, contact discovery, and
//! encryption-at-rest are the caller's collaborators.
//!
//! ## Architecture
//!
//! ```text
//! SessionManager (per account, locking + persistence discipline)
//!   ├─ KeyManager        identity, signed prekeys, one-time prekey pool
//!   ├─ handshake         X3DH root-key agreement from bundles
//!   ├─ RatchetState      double ratchet, one per contact
//!   └─ Storage           key records + session records (sync, sans-IO)
//! ```
//!
//! All cryptography is delegated to a [`murmur_crypto::CipherSuite`]
//! implementation; this crate never touches a primitive directly.
//!
//! ## Persistence discipline
//!
//! Every mutating operation advances a working copy, persists it, and only
//! then commits it to memory. Ciphertext and plaintext are released to the
//! caller strictly after the state that produced them is durable, so a
//! crash can never replay a message number or lose a consumed prekey.

pub mod error;
pub mod handshake;
pub mod keys;
pub mod ratchet;
pub mod session;
pub mod storage;

pub use error::SessionError;
pub use handshake::{HandshakeHeader, KeyBundle};
pub use keys::KeyManager;
pub use ratchet::{Envelope, RatchetState, MAX_SKIP};
pub use session::SessionManager;
pub use storage::{FlakyStorage, MemoryStorage, Storage, StorageError};
