//! Storage abstraction for key and session state
//!
//! This module provides a trait-based abstraction for persisting key
//! material and ratchet state. The trait is synchronous (no async): every
//! mutating protocol operation must complete its durable write before
//! returning, so the persistence call sits inline on the protocol path.
//!
//! Private key bytes inside the records cross this boundary as the caller
//! supplies them; encrypting them at rest with a key derived from a
//! user-supplied secret is the storage implementation's (or its wrapper's)
//! responsibility.

mod error;
mod flaky;
mod memory;

pub use error::StorageError;
pub use flaky::FlakyStorage;
pub use memory::MemoryStorage;

use crate::keys::KeyRecord;
use crate::ratchet::SessionRecord;

/// Storage abstraction for key records and per-contact session records
///
/// This trait must be:
/// - Clone: Can be shared with multiple managers
/// - Send + Sync: Thread-safe for concurrent sessions
/// - Synchronous: No async methods; writes complete before returning
///
/// # Clone Semantics
///
/// Implementations typically share internal state via Arc, meaning clones
/// access the same underlying storage.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Store the key record for a user, overwriting any existing one
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the durable write fails. The caller
    /// must roll back its in-memory mutation in that case.
    fn store_key_record(&self, user_id: &str, record: &KeyRecord) -> Result<(), StorageError>;

    /// Load the key record for a user
    ///
    /// Returns `None` if the user has no stored keys.
    fn load_key_record(&self, user_id: &str) -> Result<Option<KeyRecord>, StorageError>;

    /// Store the session record for a (user, contact) pair
    ///
    /// Overwrites any existing record; the ratchet advances strictly
    /// forward so the newest record is always the right one.
    fn store_session(
        &self,
        user_id: &str,
        contact_id: &str,
        record: &SessionRecord,
    ) -> Result<(), StorageError>;

    /// Load the session record for a (user, contact) pair
    ///
    /// Returns `None` if no session has been established with the contact.
    fn load_session(
        &self,
        user_id: &str,
        contact_id: &str,
    ) -> Result<Option<SessionRecord>, StorageError>;

    /// Delete the session record for a (user, contact) pair
    ///
    /// Deleting an absent record is not an error.
    fn delete_session(&self, user_id: &str, contact_id: &str) -> Result<(), StorageError>;
}
