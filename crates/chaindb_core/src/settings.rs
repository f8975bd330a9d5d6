//! Store configuration.

use std::path::{Path, PathBuf};

/// Configuration for creating or opening a chain store.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the store root directory.
    pub directory: PathBuf,

    /// Whether to maintain the address (payment) index. When disabled the
    /// address table is not instantiated and address operations are no-ops.
    pub index_addresses: bool,

    /// Whether every write flushes to disk under the flush-lock barrier.
    /// When disabled the caller is responsible for periodic flushing.
    pub flush_writes: bool,

    /// Capacity reservation for the block table.
    pub block_table_buckets: usize,

    /// Capacity reservation for the transaction table.
    pub transaction_table_buckets: usize,

    /// Capacity reservation for the address table.
    pub address_table_buckets: usize,

    /// Geometric growth factor (percent) for table image buffers.
    pub file_growth_rate: usize,

    /// Capacity reservation for the transaction slab.
    pub cache_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("chaindb"),
            index_addresses: true,
            flush_writes: false,
            block_table_buckets: 4_096,
            transaction_table_buckets: 16_384,
            address_table_buckets: 8_192,
            file_growth_rate: 50,
            cache_capacity: 4_096,
        }
    }
}

impl Settings {
    /// Creates settings with default values rooted at `directory`.
    #[must_use]
    pub fn with_directory(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Sets whether the address index is maintained.
    #[must_use]
    pub fn index_addresses(mut self, value: bool) -> Self {
        self.index_addresses = value;
        self
    }

    /// Sets whether every write flushes under the flush-lock barrier.
    #[must_use]
    pub fn flush_writes(mut self, value: bool) -> Self {
        self.flush_writes = value;
        self
    }

    /// Sets the block table capacity reservation.
    #[must_use]
    pub fn block_table_buckets(mut self, value: usize) -> Self {
        self.block_table_buckets = value;
        self
    }

    /// Sets the transaction table capacity reservation.
    #[must_use]
    pub fn transaction_table_buckets(mut self, value: usize) -> Self {
        self.transaction_table_buckets = value;
        self
    }

    /// Sets the address table capacity reservation.
    #[must_use]
    pub fn address_table_buckets(mut self, value: usize) -> Self {
        self.address_table_buckets = value;
        self
    }

    /// Sets the image buffer growth factor (percent).
    #[must_use]
    pub fn file_growth_rate(mut self, value: usize) -> Self {
        self.file_growth_rate = value;
        self
    }

    /// Sets the transaction slab capacity reservation.
    #[must_use]
    pub fn cache_capacity(mut self, value: usize) -> Self {
        self.cache_capacity = value;
        self
    }
}
