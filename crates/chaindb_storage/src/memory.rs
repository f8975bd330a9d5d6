//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;

/// An in-memory image store.
///
/// Holds the image in a `Vec<u8>`. Nothing is persisted; the image is lost
/// when the backend is dropped. Used by unit tests and in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    image: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.image.read().clone())
    }

    fn replace(&self, image: &[u8]) -> StorageResult<()> {
        *self.image.write() = image.to_vec();
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.image.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.read_all().unwrap().is_empty());
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn replace_swaps_image() {
        let backend = InMemoryBackend::new();

        backend.replace(b"one").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"one");

        backend.replace(b"two").unwrap();
        assert_eq!(backend.read_all().unwrap(), b"two");
        assert_eq!(backend.len().unwrap(), 3);
    }

    #[test]
    fn sync_is_a_no_op() {
        let backend = InMemoryBackend::new();
        backend.replace(b"data").unwrap();
        backend.sync().unwrap();
        assert_eq!(backend.read_all().unwrap(), b"data");
    }
}
