//! Chain primitives consumed by the store.
//!
//! These are already-parsed values: the store performs no consensus
//! validation, script execution, or wire decoding on them.

mod block;
mod hash;
mod header;
mod payment;
mod transaction;

pub use block::Block;
pub use hash::{sha256, AddressHash, Hash256};
pub use header::{Header, HeaderMetadata, InvalidReason};
pub use payment::Payment;
pub use transaction::{Input, OutPoint, Output, Transaction, TxLink, TxMetadata};

use std::fmt;

/// A (height, hash) checkpoint identifying the common ancestor of two
/// chains during reorganization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkPoint {
    /// Height of the fork point.
    pub height: u32,
    /// Header hash at that height.
    pub hash: Hash256,
}

impl ForkPoint {
    /// Creates a fork point.
    #[must_use]
    pub const fn new(height: u32, hash: Hash256) -> Self {
        Self { height, hash }
    }
}

impl fmt::Display for ForkPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.height, self.hash)
    }
}
