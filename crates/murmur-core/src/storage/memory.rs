//! In-memory storage for tests and non-persistent deployments

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::keys::KeyRecord;
use crate::ratchet::SessionRecord;

use super::error::StorageError;
use super::Storage;

/// In-memory [`Storage`] implementation.
///
/// Records are held CBOR-encoded, exactly as a persistent backend would
/// hold them, so serialization faults surface in tests the same way they
/// would in production. Clones share the same underlying map via Arc.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    key_records: HashMap<String, Vec<u8>>,
    sessions: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn session_key(user_id: &str, contact_id: &str) -> String {
        format!("{user_id}/{contact_id}")
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        // A poisoned lock means a holder panicked mid-write; the encoded
        // records are still whole values, so recover the inner state.
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
        ciborium::de::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl Storage for MemoryStorage {
    fn store_key_record(&self, user_id: &str, record: &KeyRecord) -> Result<(), StorageError> {
        let encoded = Self::encode(record)?;
        self.with_inner(|inner| {
            inner.key_records.insert(user_id.to_string(), encoded);
        });
        Ok(())
    }

    fn load_key_record(&self, user_id: &str) -> Result<Option<KeyRecord>, StorageError> {
        let encoded = self.with_inner(|inner| inner.key_records.get(user_id).cloned());
        encoded.map(|bytes| Self::decode(&bytes)).transpose()
    }

    fn store_session(
        &self,
        user_id: &str,
        contact_id: &str,
        record: &SessionRecord,
    ) -> Result<(), StorageError> {
        let encoded = Self::encode(record)?;
        self.with_inner(|inner| {
            inner.sessions.insert(Self::session_key(user_id, contact_id), encoded);
        });
        Ok(())
    }

    fn load_session(
        &self,
        user_id: &str,
        contact_id: &str,
    ) -> Result<Option<SessionRecord>, StorageError> {
        let key = Self::session_key(user_id, contact_id);
        let encoded = self.with_inner(|inner| inner.sessions.get(&key).cloned());
        encoded.map(|bytes| Self::decode(&bytes)).transpose()
    }

    fn delete_session(&self, user_id: &str, contact_id: &str) -> Result<(), StorageError> {
        let key = Self::session_key(user_id, contact_id);
        self.with_inner(|inner| {
            inner.sessions.remove(&key);
        });
        Ok(())
    }
}
