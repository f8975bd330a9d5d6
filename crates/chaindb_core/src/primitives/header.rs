//! Block headers and their store-side metadata.

use crate::primitives::hash::{sha256, Hash256};

/// Reason a header failed validation.
///
/// The store records the reason but never derives it; validation happens
/// upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// The proof of work does not satisfy the target.
    BadProofOfWork,
    /// The merkle root does not match the transaction set.
    BadMerkleRoot,
    /// The header timestamp is out of range.
    BadTimestamp,
    /// A transaction in the block is invalid.
    BadTransaction,
}

impl InvalidReason {
    /// Encodes the reason as a nonzero code for the block record.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::BadProofOfWork => 1,
            Self::BadMerkleRoot => 2,
            Self::BadTimestamp => 3,
            Self::BadTransaction => 4,
        }
    }

    /// Decodes a record code.
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::BadProofOfWork),
            2 => Some(Self::BadMerkleRoot),
            3 => Some(Self::BadTimestamp),
            4 => Some(Self::BadTransaction),
            _ => None,
        }
    }
}

/// Store-side metadata attached to a header.
///
/// Populated by store operations and queries; never part of header
/// identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderMetadata {
    /// The header exists in the block table.
    pub exists: bool,
    /// The stored record has a transaction association.
    pub populated: bool,
    /// The header has been validated or invalidated.
    pub validated: bool,
    /// The header is a member of the candidate index.
    pub candidate: bool,
    /// The header is a member of the confirmed index.
    pub confirmed: bool,
    /// Why validation failed, if it did.
    pub error: Option<InvalidReason>,
    /// Median time past carried with the header for confirmation.
    pub median_time_past: u32,
}

/// An already-parsed block header.
///
/// Equality and hashing cover only the consensus fields; `metadata` is
/// store bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Header {
    /// Header version.
    pub version: u32,
    /// Hash of the parent header.
    pub parent: Hash256,
    /// Merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Header timestamp.
    pub timestamp: u32,
    /// Compact difficulty target.
    pub bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
    /// Store-side metadata.
    pub metadata: HeaderMetadata,
}

impl Header {
    /// Fixed encoded size of the consensus fields.
    pub const ENCODED_SIZE: usize = 4 + 32 + 32 + 4 + 4 + 4;

    /// Computes the header hash over the canonical encoding.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        sha256(&self.encode())
    }

    /// Canonical little-endian encoding of the consensus fields.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.parent.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf
    }
}

impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.parent == other.parent
            && self.merkle_root == other.merkle_root
            && self.timestamp == other.timestamp
            && self.bits == other.bits
            && self.nonce == other.nonce
    }
}

impl Eq for Header {}
