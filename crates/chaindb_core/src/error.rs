//! Error types for the chain store.

use thiserror::Error;

/// Result type for chain store operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors returned by chain store operations.
///
/// The first five variants are the coarse outcome codes of the write
/// facade; the remainder are ambient failures from the storage layer and
/// lifecycle guards.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The directory lock is unavailable, the flush lock could not be
    /// created, or `end_write` failed. The store may be quarantined.
    #[error("store lock failure: the store is locked or quarantined")]
    StoreLockFailure,

    /// A primitive operation failed after the write began; the store is
    /// consistent but the requested change was not applied.
    #[error("operation failed")]
    OperationFailed,

    /// A transaction with the same hash already exists.
    #[error("duplicate transaction")]
    DuplicateTransaction,

    /// A referenced header or transaction is missing.
    #[error("not found")]
    NotFound,

    /// The block's header is already marked as failed.
    #[error("validation failed")]
    ValidationFailed,

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] chaindb_storage::StorageError),

    /// A table image failed its checksum or could not be decoded.
    #[error("corrupt table image: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,
}

impl ChainError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ChainError::DuplicateTransaction.to_string(),
            "duplicate transaction"
        );
        assert_eq!(ChainError::NotFound.to_string(), "not found");
        assert_eq!(
            ChainError::corruption("bad magic").to_string(),
            "corrupt table image: bad magic"
        );
    }
}
