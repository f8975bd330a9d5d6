//! Payment rows stored under an address hash.

use crate::primitives::transaction::TxLink;

/// One payment row: a transaction's input or output touching an address.
///
/// Rows are append-only and never mutated; confirmation is derived from the
/// referenced transaction's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payment {
    /// Link of the transaction that paid or spent.
    pub link: TxLink,
    /// Input or output index within that transaction.
    pub index: u32,
    /// Output value, or the prevout checksum for an input row.
    pub data: u64,
    /// True for an output row, false for an input (spend) row.
    pub output: bool,
}

impl Payment {
    /// Encoded size of one payment row.
    pub const ENCODED_SIZE: usize = 8 + 4 + 8 + 1;

    /// Creates an output row.
    #[must_use]
    pub const fn output(link: TxLink, index: u32, value: u64) -> Self {
        Self {
            link,
            index,
            data: value,
            output: true,
        }
    }

    /// Creates an input (spend) row.
    #[must_use]
    pub const fn input(link: TxLink, index: u32, checksum: u64) -> Self {
        Self {
            link,
            index,
            data: checksum,
            output: false,
        }
    }
}
