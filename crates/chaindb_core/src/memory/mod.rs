//! Reader access to published table images.
//!
//! Each table file publishes its committed image through a [`Region`].
//! Readers obtain a scoped [`Accessor`] whose lifetime pins the image, and
//! writers swap the image only after in-flight readers drain. The
//! three-phase [`UpgradeLock`] serializes the handoff so at most one
//! pending reader is promoted at a time without starving writers.

mod accessor;
mod upgrade;

pub use accessor::Accessor;
pub use upgrade::UpgradeLock;

use parking_lot::Mutex;
use std::sync::Arc;

/// A table file's published image.
///
/// `publish` installs a new image under the exclusive lock, waiting for
/// outstanding accessors to release. Readers go through [`Region::access`],
/// which performs the upgrade-to-shared transition.
#[derive(Debug, Default)]
pub struct Region {
    lock: UpgradeLock,
    image: Mutex<Arc<Vec<u8>>>,
}

impl Region {
    /// Creates an empty region.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a region holding `image`.
    #[must_use]
    pub fn with_image(image: Vec<u8>) -> Self {
        Self {
            lock: UpgradeLock::new(),
            image: Mutex::new(Arc::new(image)),
        }
    }

    /// Opens a scoped reader over the current image.
    ///
    /// The accessor holds the shared lock until dropped; a concurrent
    /// `publish` waits for it.
    pub fn access(&self) -> Accessor<'_> {
        let mut accessor = Accessor::new(&self.lock);
        accessor.assign(Arc::clone(&self.image.lock()));
        accessor
    }

    /// Atomically installs a new image.
    ///
    /// Blocks until all outstanding accessors release, then swaps the
    /// image so later readers observe only the new bytes.
    pub fn publish(&self, image: Vec<u8>) {
        self.lock.lock_exclusive();
        *self.image.lock() = Arc::new(image);
        self.lock.unlock_exclusive();
    }

    /// Returns the current image without entering the reader protocol.
    ///
    /// Used by the flush path, which already runs under the write barrier.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.image.lock())
    }
}
