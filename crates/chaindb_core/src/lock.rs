//! Process and flush locks for the store directory.
//!
//! Two locks guard a store directory:
//!
//! - `LOCK` - an advisory exclusive lock held for the lifetime of the open
//!   store; a second process fails to open.
//! - `flush_lock` - a persistent sentinel created when a flushed write
//!   begins and removed only after the write's flush completes. Its
//!   presence at open time means a write was in progress when the process
//!   died; the store must not be opened without operator intervention.

use crate::error::{ChainError, ChainResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const FLUSH_LOCK_FILE: &str = "flush_lock";

#[cfg(unix)]
fn sync_directory(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> std::io::Result<()> {
    // NTFS journaling covers metadata durability.
    Ok(())
}

/// Advisory exclusive lock on a store directory.
///
/// Held for the lifetime of the value; released when dropped.
#[derive(Debug)]
pub struct ExclusiveLock {
    _file: File,
}

impl ExclusiveLock {
    /// Acquires the directory lock, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::StoreLockFailure`] if another process holds
    /// the lock.
    pub fn acquire(directory: &Path) -> ChainResult<Self> {
        fs::create_dir_all(directory).map_err(|_| ChainError::StoreLockFailure)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(directory.join(LOCK_FILE))
            .map_err(|_| ChainError::StoreLockFailure)?;

        if file.try_lock_exclusive().is_err() {
            return Err(ChainError::StoreLockFailure);
        }

        Ok(Self { _file: file })
    }
}

/// The persistent flush-lock sentinel.
#[derive(Debug)]
pub struct FlushLock {
    directory: PathBuf,
}

impl FlushLock {
    /// Creates a handle for the sentinel in `directory`.
    #[must_use]
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
        }
    }

    fn path(&self) -> PathBuf {
        self.directory.join(FLUSH_LOCK_FILE)
    }

    /// Returns true if the sentinel is present on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Creates the sentinel and makes it durable.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::StoreLockFailure`] if the sentinel cannot be
    /// created or made durable.
    pub fn create(&self) -> ChainResult<()> {
        let create = File::create(self.path())
            .and_then(|file| file.sync_all())
            .and_then(|()| sync_directory(&self.directory));

        create.map_err(|_| ChainError::StoreLockFailure)
    }

    /// Removes the sentinel and makes the removal durable.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::StoreLockFailure`] if the sentinel cannot be
    /// removed or the removal made durable.
    pub fn remove(&self) -> ChainResult<()> {
        let remove =
            fs::remove_file(self.path()).and_then(|()| sync_directory(&self.directory));

        remove.map_err(|_| ChainError::StoreLockFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn exclusive_lock_blocks_second_holder() {
        let dir = tempdir().unwrap();

        let first = ExclusiveLock::acquire(dir.path()).unwrap();
        let second = ExclusiveLock::acquire(dir.path());
        assert!(matches!(second, Err(ChainError::StoreLockFailure)));

        drop(first);
        ExclusiveLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn exclusive_lock_creates_directory() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("store");

        let _lock = ExclusiveLock::acquire(&store).unwrap();
        assert!(store.is_dir());
    }

    #[test]
    fn flush_lock_round_trip() {
        let dir = tempdir().unwrap();
        let lock = FlushLock::new(dir.path());

        assert!(!lock.exists());
        lock.create().unwrap();
        assert!(lock.exists());
        lock.remove().unwrap();
        assert!(!lock.exists());
    }

    #[test]
    fn flush_lock_remove_without_create_fails() {
        let dir = tempdir().unwrap();
        let lock = FlushLock::new(dir.path());
        assert!(matches!(lock.remove(), Err(ChainError::StoreLockFailure)));
    }
}
