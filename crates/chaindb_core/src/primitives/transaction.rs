//! Transactions and their store-side metadata.

use crate::primitives::hash::{sha256, AddressHash, Hash256};
use std::fmt;

/// Opaque row identifier assigned when a transaction is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxLink(pub u64);

impl TxLink {
    /// Creates a link from a raw slab position.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw slab position.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Reference to a transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Hash of the transaction holding the output.
    pub hash: Hash256,
    /// Output index within that transaction.
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint used by coinbase inputs.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            hash: Hash256::ZERO,
            index: u32::MAX,
        }
    }

    /// Returns true for the coinbase null outpoint.
    #[must_use]
    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }

    /// A 64-bit checksum of the outpoint, recorded on input payment rows.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let bytes: [u8; 8] = self.hash.as_bytes()[..8]
            .try_into()
            .unwrap_or([0u8; 8]);
        u64::from_le_bytes(bytes) ^ u64::from(self.index)
    }
}

/// A transaction input: the outpoint it spends.
///
/// `prevout_address` carries the spent output's address when the upstream
/// parser had the prevout cached; like metadata, it is excluded from
/// identity and the canonical encoding.
#[derive(Debug, Clone, Copy)]
pub struct Input {
    /// The spent outpoint.
    pub prevout: OutPoint,
    /// Address of the spent output, if cached upstream.
    pub prevout_address: Option<AddressHash>,
}

impl Input {
    /// Creates an input spending `prevout` with no cached address.
    #[must_use]
    pub const fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            prevout_address: None,
        }
    }
}

impl PartialEq for Input {
    fn eq(&self, other: &Self) -> bool {
        self.prevout == other.prevout
    }
}

impl Eq for Input {}

/// A transaction output: a value and, when the upstream parser resolved
/// one, the paid address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    /// Output value.
    pub value: u64,
    /// Already-parsed payment address, if any.
    pub address: Option<AddressHash>,
}

/// Store-side metadata attached to a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxMetadata {
    /// Row link assigned by the transaction table.
    pub link: Option<TxLink>,
    /// The transaction already existed when last stored.
    pub existed: bool,
}

/// An already-parsed transaction.
///
/// Equality covers only the consensus fields; `metadata` is store
/// bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    /// Transaction version.
    pub version: u32,
    /// Inputs in order.
    pub inputs: Vec<Input>,
    /// Outputs in order.
    pub outputs: Vec<Output>,
    /// Lock time.
    pub lock_time: u32,
    /// Store-side metadata.
    pub metadata: TxMetadata,
}

impl Transaction {
    /// Computes the transaction hash over the canonical encoding.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        sha256(&self.encode())
    }

    /// Returns true if the single input spends the null outpoint.
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Canonical little-endian encoding of the consensus fields.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(input.prevout.hash.as_bytes());
            buf.extend_from_slice(&input.prevout.index.to_le_bytes());
        }
        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            match output.address {
                Some(address) => {
                    buf.push(1);
                    buf.extend_from_slice(address.as_bytes());
                }
                None => buf.push(0),
            }
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.lock_time == other.lock_time
    }
}

impl Eq for Transaction {}
