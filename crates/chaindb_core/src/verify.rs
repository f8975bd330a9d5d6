//! Verification predicates.
//!
//! Pure checks the facade runs under the write mutex, before entering the
//! write barrier. They read table state and never mutate it.

use crate::error::{ChainError, ChainResult};
use crate::primitives::{Block, ForkPoint, Header, Transaction};
use crate::tables::{BlockTable, TransactionTable};

/// Fails with `NotFound` if the header is not stored.
pub fn verify_header_exists(blocks: &BlockTable, header: &Header) -> ChainResult<()> {
    if blocks.exists(&header.hash()) {
        Ok(())
    } else {
        Err(ChainError::NotFound)
    }
}

/// Fails with `NotFound` if the transaction is not stored.
pub fn verify_transaction_exists(txs: &TransactionTable, tx: &Transaction) -> ChainResult<()> {
    if txs.exists(&tx.hash()) {
        Ok(())
    } else {
        Err(ChainError::NotFound)
    }
}

/// Fails with `DuplicateTransaction` if a transaction with the same hash
/// is already stored.
pub fn verify_transaction_missing(txs: &TransactionTable, tx: &Transaction) -> ChainResult<()> {
    if txs.exists(&tx.hash()) {
        Err(ChainError::DuplicateTransaction)
    } else {
        Ok(())
    }
}

/// Fails with `ValidationFailed` if the block's header is already marked
/// failed, or `NotFound` if it is not stored.
pub fn verify_not_failed(blocks: &BlockTable, block: &Block) -> ChainResult<()> {
    match blocks.get_by_hash(&block.hash()) {
        None => Err(ChainError::NotFound),
        Some(result) if result.error.is_some() => Err(ChainError::ValidationFailed),
        Some(_) => Ok(()),
    }
}

/// Checks that a stored, unpopulated header is ready to receive its
/// transaction association at `height`.
pub fn verify_update(blocks: &BlockTable, block: &Block, height: u32) -> ChainResult<()> {
    match blocks.get_by_hash(&block.hash()) {
        None => Err(ChainError::NotFound),
        Some(result) if result.height != height => Err(ChainError::OperationFailed),
        Some(result) if result.transaction_count() != 0 => Err(ChainError::OperationFailed),
        Some(_) => Ok(()),
    }
}

/// Checks that `header` is the next candidate: its height is one past the
/// candidate top and its parent is the current top entry.
pub fn verify_push_header(blocks: &BlockTable, header: &Header, height: u32) -> ChainResult<()> {
    verify_push(blocks, header, height, true)
}

/// Checks that `block` is the next confirmed entry: its height is one past
/// the confirmed top and its parent is the current top entry.
pub fn verify_push_block(blocks: &BlockTable, block: &Block, height: u32) -> ChainResult<()> {
    verify_push(blocks, &block.header, height, false)
}

fn verify_push(
    blocks: &BlockTable,
    header: &Header,
    height: u32,
    candidate: bool,
) -> ChainResult<()> {
    let next = match blocks.top(candidate) {
        Some(top) => top
            .checked_add(1)
            .ok_or(ChainError::OperationFailed)?,
        None => 0,
    };
    if height != next {
        return Err(ChainError::OperationFailed);
    }

    if height > 0 {
        let parent = blocks
            .get(height - 1, candidate)
            .ok_or(ChainError::OperationFailed)?;
        if parent.hash != header.parent {
            return Err(ChainError::OperationFailed);
        }
    }

    Ok(())
}

/// Checks that `height` is the top of the selected index.
pub fn verify_top(blocks: &BlockTable, height: u32, candidate: bool) -> ChainResult<()> {
    if blocks.top(candidate) == Some(height) {
        Ok(())
    } else {
        Err(ChainError::OperationFailed)
    }
}

/// Checks that the fork point matches the entry at its height in the
/// selected index.
pub fn verify_fork_point(
    blocks: &BlockTable,
    fork_point: &ForkPoint,
    candidate: bool,
) -> ChainResult<()> {
    let entry = blocks
        .get(fork_point.height, candidate)
        .ok_or(ChainError::NotFound)?;
    if entry.hash == fork_point.hash {
        Ok(())
    } else {
        Err(ChainError::OperationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Hash256;
    use crate::primitives::InvalidReason;
    use chaindb_storage::InMemoryBackend;

    fn blocks() -> BlockTable {
        let table = BlockTable::new(
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            16,
            50,
        );
        table.create().unwrap();
        table
    }

    fn txs() -> TransactionTable {
        let table = TransactionTable::new(Box::new(InMemoryBackend::new()), 16, 50);
        table.create().unwrap();
        table
    }

    fn header(parent: Hash256, nonce: u32) -> Header {
        Header {
            version: 1,
            parent,
            nonce,
            ..Default::default()
        }
    }

    #[test]
    fn header_exists() {
        let blocks = blocks();
        let mut h = header(Hash256::ZERO, 1);

        assert!(matches!(
            verify_header_exists(&blocks, &h),
            Err(ChainError::NotFound)
        ));

        blocks.store(&mut h, 0, 0);
        assert!(verify_header_exists(&blocks, &h).is_ok());
    }

    #[test]
    fn transaction_missing_and_exists() {
        let txs = txs();
        let mut tx = Transaction::default();

        assert!(verify_transaction_missing(&txs, &tx).is_ok());
        assert!(matches!(
            verify_transaction_exists(&txs, &tx),
            Err(ChainError::NotFound)
        ));

        txs.store(&mut tx, 0);
        assert!(matches!(
            verify_transaction_missing(&txs, &tx),
            Err(ChainError::DuplicateTransaction)
        ));
        assert!(verify_transaction_exists(&txs, &tx).is_ok());
    }

    #[test]
    fn not_failed_refuses_failed_header() {
        let blocks = blocks();
        let mut h = header(Hash256::ZERO, 1);
        blocks.store(&mut h, 0, 0);

        let block = Block::new(h.clone(), Vec::new());
        assert!(verify_not_failed(&blocks, &block).is_ok());

        blocks.validate(&h.hash(), Some(InvalidReason::BadProofOfWork));
        assert!(matches!(
            verify_not_failed(&blocks, &block),
            Err(ChainError::ValidationFailed)
        ));
    }

    #[test]
    fn update_checks_height_and_population() {
        let blocks = blocks();
        let mut h = header(Hash256::ZERO, 1);
        let block = Block::new(h.clone(), Vec::new());

        assert!(matches!(
            verify_update(&blocks, &block, 0),
            Err(ChainError::NotFound)
        ));

        blocks.store(&mut h, 5, 0);
        assert!(matches!(
            verify_update(&blocks, &block, 4),
            Err(ChainError::OperationFailed)
        ));
        assert!(verify_update(&blocks, &block, 5).is_ok());
    }

    #[test]
    fn push_requires_next_height_and_parent() {
        let blocks = blocks();
        let mut genesis = header(Hash256::ZERO, 1);
        blocks.store(&mut genesis, 0, 0);

        assert!(verify_push_header(&blocks, &genesis, 0).is_ok());
        blocks.index(&genesis.hash(), 0, true);

        let child = header(genesis.hash(), 2);
        assert!(verify_push_header(&blocks, &child, 1).is_ok());
        assert!(matches!(
            verify_push_header(&blocks, &child, 2),
            Err(ChainError::OperationFailed)
        ));

        let orphan = header(Hash256([9; 32]), 3);
        assert!(matches!(
            verify_push_header(&blocks, &orphan, 1),
            Err(ChainError::OperationFailed)
        ));
    }

    #[test]
    fn top_matches_selected_index() {
        let blocks = blocks();
        let mut genesis = header(Hash256::ZERO, 1);
        blocks.store(&mut genesis, 0, 0);
        blocks.index(&genesis.hash(), 0, true);

        assert!(verify_top(&blocks, 0, true).is_ok());
        assert!(matches!(
            verify_top(&blocks, 1, true),
            Err(ChainError::OperationFailed)
        ));
        assert!(matches!(
            verify_top(&blocks, 0, false),
            Err(ChainError::OperationFailed)
        ));
    }

    #[test]
    fn fork_point_must_match_indexed_entry() {
        let blocks = blocks();
        let mut genesis = header(Hash256::ZERO, 1);
        blocks.store(&mut genesis, 0, 0);
        blocks.index(&genesis.hash(), 0, true);

        let good = ForkPoint::new(0, genesis.hash());
        assert!(verify_fork_point(&blocks, &good, true).is_ok());

        let wrong_hash = ForkPoint::new(0, Hash256([8; 32]));
        assert!(matches!(
            verify_fork_point(&blocks, &wrong_hash, true),
            Err(ChainError::OperationFailed)
        ));

        let past_top = ForkPoint::new(3, genesis.hash());
        assert!(matches!(
            verify_fork_point(&blocks, &past_top, true),
            Err(ChainError::NotFound)
        ));
    }
}
