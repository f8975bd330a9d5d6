//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level image store for a single table file.
///
/// Backends hold one table file's current image as opaque bytes. They do not
/// understand headers, transactions, or index arrays - the table layer owns
/// all format interpretation.
///
/// # Invariants
///
/// - `read_all` returns exactly the bytes of the last durable `replace`
///   (or the empty image for a file that was never written)
/// - `replace` installs a complete new image; a crash during `replace`
///   leaves either the old image or the new one, never a mix
/// - `sync` makes the most recent `replace` durable against process and
///   power loss
/// - Backends must be `Send + Sync`; implementations lock internally
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - for testing
/// - [`super::FileBackend`] - for persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the entire current image.
    ///
    /// A file that does not exist yet reads as the empty image.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Atomically replaces the image with `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the new image cannot be installed.
    fn replace(&self, image: &[u8]) -> StorageResult<()>;

    /// Makes the most recent `replace` durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current image size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn len(&self) -> StorageResult<u64>;

    /// Returns true if the current image is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
