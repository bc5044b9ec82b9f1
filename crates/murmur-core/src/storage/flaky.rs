//! Fault-injecting storage wrapper
//!
//! Delegates to an underlying [`Storage`] but fails writes on demand. Used
//! to verify the session manager's rollback discipline: a failed write must
//! surface as an error and leave in-memory state untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{Storage, StorageError};
use crate::keys::KeyRecord;
use crate::ratchet::SessionRecord;

/// Storage wrapper that fails writes while a switch is thrown, or after a
/// write budget runs out.
///
/// Reads always pass through; only mutating operations are failed, since
/// those are the ones the rollback discipline guards. The budget mode lets
/// a test land the first write of a multi-write commit and fail the rest,
/// exercising partial-persist recovery. Clone shares the switch and budget,
/// matching the shared-handle semantics of the trait.
#[derive(Clone)]
pub struct FlakyStorage<S: Storage> {
    inner: S,
    failing: Arc<AtomicBool>,
    // usize::MAX means no budget is set
    write_budget: Arc<AtomicUsize>,
    write_attempts: Arc<AtomicUsize>,
}

impl<S: Storage> FlakyStorage<S> {
    /// Wrap `inner`, initially passing everything through.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
            write_budget: Arc::new(AtomicUsize::new(usize::MAX)),
            write_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Throw or clear the failure switch. Clearing also lifts any write
    /// budget set with [`fail_after`](Self::fail_after).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
        if !failing {
            self.write_budget.store(usize::MAX, Ordering::SeqCst);
        }
    }

    /// Let the next `writes` writes through, then fail every write until
    /// the switch is cleared with `set_failing(false)`.
    pub fn fail_after(&self, writes: usize) {
        self.write_budget.store(writes, Ordering::SeqCst);
    }

    /// Underlying storage, for checking invariants after injected faults.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of write operations attempted through this wrapper.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> Result<(), StorageError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io("injected write failure".to_string()));
        }
        let budget = self.write_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(StorageError::Io("injected write failure".to_string()));
        }
        if budget != usize::MAX {
            self.write_budget.store(budget - 1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl<S: Storage> Storage for FlakyStorage<S> {
    fn store_key_record(&self, user_id: &str, record: &KeyRecord) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.store_key_record(user_id, record)
    }

    fn load_key_record(&self, user_id: &str) -> Result<Option<KeyRecord>, StorageError> {
        self.inner.load_key_record(user_id)
    }

    fn store_session(
        &self,
        user_id: &str,
        contact_id: &str,
        record: &SessionRecord,
    ) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.store_session(user_id, contact_id, record)
    }

    fn load_session(
        &self,
        user_id: &str,
        contact_id: &str,
    ) -> Result<Option<SessionRecord>, StorageError> {
        self.inner.load_session(user_id, contact_id)
    }

    fn delete_session(&self, user_id: &str, contact_id: &str) -> Result<(), StorageError> {
        self.check_write()?;
        self.inner.delete_session(user_id, contact_id)
    }
}
