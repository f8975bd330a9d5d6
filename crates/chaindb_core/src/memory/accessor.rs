//! Scoped reader handle over a published image.

use crate::memory::upgrade::UpgradeLock;
use std::sync::Arc;

/// A scoped reader over a table image.
///
/// Construction acquires the upgrade phase of the region's lock; `assign`
/// trades it for a shared hold and pins the image. The shared hold is
/// released on drop, letting a waiting writer swap the image.
#[derive(Debug)]
pub struct Accessor<'a> {
    lock: &'a UpgradeLock,
    image: Option<Arc<Vec<u8>>>,
    offset: usize,
}

impl<'a> Accessor<'a> {
    /// Acquires the upgrade phase on `lock`.
    pub(crate) fn new(lock: &'a UpgradeLock) -> Self {
        lock.lock_upgrade();
        Self {
            lock,
            image: None,
            offset: 0,
        }
    }

    /// Pins `image` and trades the upgrade phase for a shared hold.
    pub(crate) fn assign(&mut self, image: Arc<Vec<u8>>) {
        debug_assert!(self.image.is_none(), "buffer already assigned");
        self.lock.unlock_upgrade_and_lock_shared();
        self.image = Some(image);
    }

    /// Returns the image bytes from the current read position.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        match &self.image {
            Some(image) => &image[self.offset..],
            None => &[],
        }
    }

    /// Advances the read position by `count` bytes.
    ///
    /// Returns false when the advance would run past the end of the image
    /// or overflow; the position is unchanged in that case.
    pub fn increment(&mut self, count: usize) -> bool {
        let len = self.image.as_ref().map_or(0, |image| image.len());
        match self.offset.checked_add(count) {
            Some(next) if next <= len => {
                self.offset = next;
                true
            }
            _ => false,
        }
    }

    /// Returns the number of bytes remaining from the read position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer().len()
    }
}

impl Drop for Accessor<'_> {
    fn drop(&mut self) {
        if self.image.is_some() {
            self.lock.unlock_shared();
        } else {
            self.lock.unlock_upgrade();
        }
    }
}
