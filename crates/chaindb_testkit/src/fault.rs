//! Fault-injecting storage backend.

use chaindb_storage::{StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Armable failure switches shared with a [`FaultBackend`].
///
/// The backend moves into the store under test; the flags stay with the
/// test and can be flipped at any point to make the next `replace` or
/// `sync` fail.
#[derive(Debug, Default)]
pub struct FaultFlags {
    fail_replace: AtomicBool,
    fail_sync: AtomicBool,
}

impl FaultFlags {
    /// Arms or disarms `replace` failures.
    pub fn fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }

    /// Arms or disarms `sync` failures.
    pub fn fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }
}

/// A storage backend wrapper that fails on command.
///
/// Reads always pass through; `replace` and `sync` consult the shared
/// [`FaultFlags`] first.
pub struct FaultBackend {
    inner: Box<dyn StorageBackend>,
    flags: Arc<FaultFlags>,
}

impl FaultBackend {
    /// Wraps `inner` with fresh, disarmed flags.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            flags: Arc::new(FaultFlags::default()),
        }
    }

    /// Returns the shared flags handle.
    pub fn flags(&self) -> Arc<FaultFlags> {
        Arc::clone(&self.flags)
    }
}

impl StorageBackend for FaultBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        self.inner.read_all()
    }

    fn replace(&self, image: &[u8]) -> StorageResult<()> {
        if self.flags.fail_replace.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected replace failure"));
        }
        self.inner.replace(image)
    }

    fn sync(&self) -> StorageResult<()> {
        if self.flags.fail_sync.load(Ordering::SeqCst) {
            return Err(StorageError::backend("injected sync failure"));
        }
        self.inner.sync()
    }

    fn len(&self) -> StorageResult<u64> {
        self.inner.len()
    }
}
