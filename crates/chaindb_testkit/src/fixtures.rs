//! Deterministic chain fixtures.
//!
//! Builders produce structurally valid headers, transactions, and blocks
//! whose hashes are fully determined by their seeds, so tests can link
//! chains and branches without consensus machinery.

use chaindb_core::primitives::{
    AddressHash, Block, Hash256, Header, Input, OutPoint, Output, Transaction,
};
use chaindb_core::{ChainDatabase, ChainResult};

/// A deterministic address hash derived from a seed byte.
#[must_use]
pub fn address(seed: u8) -> AddressHash {
    AddressHash([seed; 20])
}

/// A random hash for tests that only need uniqueness.
#[must_use]
pub fn random_hash() -> Hash256 {
    Hash256(rand::random())
}

/// A coinbase transaction whose hash is determined by `seed`.
#[must_use]
pub fn coinbase(seed: u8) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![Input::new(OutPoint::null())],
        outputs: vec![Output {
            value: 50 * 100_000_000,
            address: None,
        }],
        lock_time: u32::from(seed),
        metadata: Default::default(),
    }
}

/// A coinbase paying `pay_to`, hash determined by `seed`.
#[must_use]
pub fn coinbase_paying(seed: u8, pay_to: AddressHash) -> Transaction {
    let mut tx = coinbase(seed);
    tx.outputs[0].address = Some(pay_to);
    tx
}

/// A transaction spending output 0 of `prevout_hash`.
#[must_use]
pub fn spend(prevout_hash: Hash256, value: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![Input::new(OutPoint {
            hash: prevout_hash,
            index: 0,
        })],
        outputs: vec![Output {
            value,
            address: None,
        }],
        lock_time: 0,
        metadata: Default::default(),
    }
}

/// A block on `parent` carrying the given transactions.
///
/// The merkle root is stubbed with the first transaction's hash, which is
/// enough to make distinct blocks hash distinctly.
#[must_use]
pub fn block_with(parent: Hash256, seed: u8, transactions: Vec<Transaction>) -> Block {
    let merkle_root = transactions
        .first()
        .map(Transaction::hash)
        .unwrap_or(Hash256::ZERO);

    let header = Header {
        version: 1,
        parent,
        merkle_root,
        timestamp: 1_000_000 + u32::from(seed) * 60,
        bits: u32::MAX,
        nonce: u32::from(seed),
        metadata: Default::default(),
    };
    Block::new(header, transactions)
}

/// A single-coinbase block on `parent`.
#[must_use]
pub fn block_on(parent: Hash256, seed: u8) -> Block {
    block_with(parent, seed, vec![coinbase(seed)])
}

/// The genesis block used throughout the test suites.
#[must_use]
pub fn genesis() -> Block {
    block_on(Hash256::ZERO, 0)
}

/// Pushes a linear chain of single-coinbase blocks on top of the current
/// confirmed top. Returns the pushed blocks.
pub fn push_chain(db: &ChainDatabase, seeds: &[u8]) -> ChainResult<Vec<Block>> {
    let top = db
        .blocks()
        .top(false)
        .expect("chain is bootstrapped with genesis");
    let mut parent = db
        .blocks()
        .get(top, false)
        .expect("confirmed top is indexed")
        .hash;

    let mut pushed = Vec::with_capacity(seeds.len());
    let mut height = top;
    for &seed in seeds {
        height += 1;
        let mut block = block_on(parent, seed);
        db.push(&mut block, height, u32::from(seed) * 10)?;
        parent = block.hash();
        pushed.push(block);
    }
    Ok(pushed)
}

/// A branch of single-coinbase blocks forking off `parent`, not stored.
#[must_use]
pub fn branch(parent: Hash256, seeds: &[u8]) -> Vec<Block> {
    let mut parent = parent;
    let mut blocks = Vec::with_capacity(seeds.len());
    for &seed in seeds {
        let block = block_on(parent, seed);
        parent = block.hash();
        blocks.push(block);
    }
    blocks
}
