//! Reorganization: pop-above and push-all across a fork point.
//!
//! `reorganize_headers` operates on the candidate index,
//! `reorganize_blocks` on the confirmed index. The compound operations
//! take no global lock themselves; each internal push or pop is an
//! independently barrier-bracketed write, so a failure part way leaves
//! already-applied steps in place for the caller to reverse with the
//! inverse operation.

use crate::database::ChainDatabase;
use crate::error::{ChainError, ChainResult};
use crate::primitives::{Block, ForkPoint, Header, Transaction};
use crate::verify;
use tracing::trace;

impl ChainDatabase {
    // Compound operations.
    // ------------------------------------------------------------------

    /// Reorganizes the candidate header index across `fork_point`:
    /// pops the headers above it into `outgoing` (ascending by height),
    /// then pushes `incoming` on top of it.
    pub fn reorganize_headers(
        &self,
        fork_point: &ForkPoint,
        incoming: &mut [Header],
        outgoing: &mut Vec<Header>,
    ) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(%fork_point, incoming = incoming.len(), "reorganize headers");

        if overflows(fork_point, incoming.len()) {
            return Err(ChainError::OperationFailed);
        }

        if self.pop_above_headers(outgoing, fork_point) && self.push_all_headers(incoming, fork_point)
        {
            Ok(())
        } else {
            Err(ChainError::OperationFailed)
        }
    }

    /// Reorganizes the confirmed block index across `fork_point`:
    /// pops the blocks above it into `outgoing` (ascending by height),
    /// then pushes `incoming` on top of it.
    pub fn reorganize_blocks(
        &self,
        fork_point: &ForkPoint,
        incoming: &mut [Block],
        outgoing: &mut Vec<Block>,
    ) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(%fork_point, incoming = incoming.len(), "reorganize blocks");

        if overflows(fork_point, incoming.len()) {
            return Err(ChainError::OperationFailed);
        }

        if self.pop_above_blocks(outgoing, fork_point) && self.push_all_blocks(incoming, fork_point)
        {
            Ok(())
        } else {
            Err(ChainError::OperationFailed)
        }
    }

    // Header reorganization.
    // ------------------------------------------------------------------

    fn push_all_headers(&self, headers: &mut [Header], fork_point: &ForkPoint) -> bool {
        let first_height = fork_point.height + 1;

        for (offset, header) in headers.iter_mut().enumerate() {
            let median_time_past = header.metadata.median_time_past;
            let height = first_height + offset as u32;
            if self.push_header(header, height, median_time_past).is_err() {
                return false;
            }
        }
        true
    }

    fn pop_above_headers(&self, headers: &mut Vec<Header>, fork_point: &ForkPoint) -> bool {
        headers.clear();
        if verify::verify_fork_point(&self.blocks, fork_point, true).is_err() {
            return false;
        }
        let Some(top) = self.blocks.top(true) else {
            return false;
        };

        let fork = fork_point.height;
        headers.reserve((top - fork) as usize);

        // Popped top-down, returned ascending by height.
        for height in ((fork + 1)..=top).rev() {
            match self.pop_header(height) {
                Ok(header) => headers.push(header),
                Err(_) => return false,
            }
        }
        headers.reverse();
        true
    }

    /// Pushes a header onto the top of the candidate index, storing it
    /// first when it is not already present.
    pub fn push_header(
        &self,
        header: &mut Header,
        height: u32,
        median_time_past: u32,
    ) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(hash = %header.hash(), height, "push header");

        let _lock = self.write_mutex.lock();
        verify::verify_push_header(&self.blocks, header, height)?;

        self.blocks.get_header_metadata(header);

        self.barrier(|| {
            if !header.metadata.exists {
                self.blocks.store(header, height, median_time_past);
            }
            if !self.blocks.index(&header.hash(), height, true) {
                return Err(ChainError::OperationFailed);
            }
            self.blocks.commit();
            Ok(())
        })
    }

    /// Pops the header at the top of the candidate index, reversing the
    /// candidate state of its transactions and the outputs they spend.
    pub fn pop_header(&self, height: u32) -> ChainResult<Header> {
        self.ensure_open()?;
        trace!(height, "pop header");

        let _lock = self.write_mutex.lock();
        verify::verify_top(&self.blocks, height, true)?;

        let result = self
            .blocks
            .get(height, true)
            .ok_or(ChainError::OperationFailed)?;

        self.barrier(|| {
            for link in &result.tx_links {
                if !self.transactions.uncandidate(*link) {
                    return Err(ChainError::OperationFailed);
                }
            }
            if !self.blocks.unindex(&result.hash, height, true) {
                return Err(ChainError::OperationFailed);
            }
            self.transactions.commit();
            self.blocks.commit();
            Ok(())
        })?;

        Ok(result.header)
    }

    // Block reorganization.
    // ------------------------------------------------------------------

    fn push_all_blocks(&self, blocks: &mut [Block], fork_point: &ForkPoint) -> bool {
        let first_height = fork_point.height + 1;

        for (offset, block) in blocks.iter_mut().enumerate() {
            let height = first_height + offset as u32;
            if self.push_block(block, height).is_err() {
                return false;
            }
        }
        true
    }

    fn pop_above_blocks(&self, blocks: &mut Vec<Block>, fork_point: &ForkPoint) -> bool {
        blocks.clear();
        if verify::verify_fork_point(&self.blocks, fork_point, false).is_err() {
            return false;
        }
        let Some(top) = self.blocks.top(false) else {
            return false;
        };

        let fork = fork_point.height;
        blocks.reserve((top - fork) as usize);

        // Popped top-down, returned ascending by height.
        for height in ((fork + 1)..=top).rev() {
            match self.pop_block(height) {
                Ok(block) => blocks.push(block),
                Err(_) => return false,
            }
        }
        blocks.reverse();
        true
    }

    /// Confirms a candidate block at the top of the confirmed index:
    /// confirms its transactions in position order, then indexes the
    /// header as confirmed. The candidate index is unchanged.
    pub fn push_block(&self, block: &mut Block, height: u32) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(hash = %block.hash(), height, "push block");

        let _lock = self.write_mutex.lock();
        verify::verify_push_block(&self.blocks, block, height)?;

        // Median time past was recorded when the header was stored.
        let hash = block.hash();
        let median_time_past = self
            .blocks
            .get_by_hash(&hash)
            .ok_or(ChainError::NotFound)?
            .median_time_past;

        self.barrier(|| {
            for (position, tx) in block.transactions.iter().enumerate() {
                let link = self.resolve_link(tx).ok_or(ChainError::OperationFailed)?;
                if !self
                    .transactions
                    .confirm(link, height, median_time_past, position as u32)
                {
                    return Err(ChainError::OperationFailed);
                }
            }

            if !self.blocks.index(&hash, height, false) {
                return Err(ChainError::OperationFailed);
            }

            self.commit_all();
            Ok(())
        })
    }

    /// Pops the block at the top of the confirmed index, deconfirming its
    /// transactions and unspending their prevouts. The header, the stored
    /// transactions, and the candidate index are unchanged.
    pub fn pop_block(&self, height: u32) -> ChainResult<Block> {
        self.ensure_open()?;
        trace!(height, "pop block");

        let _lock = self.write_mutex.lock();
        verify::verify_top(&self.blocks, height, false)?;

        let result = self
            .blocks
            .get(height, false)
            .ok_or(ChainError::OperationFailed)?;

        let transactions = self.to_transactions(&result.tx_links)?;
        let out_block = Block::new(result.header.clone(), transactions);

        self.barrier(|| {
            for link in &result.tx_links {
                if !self.transactions.unconfirm(*link) {
                    return Err(ChainError::OperationFailed);
                }
            }
            if !self.blocks.unindex(&result.hash, height, false) {
                return Err(ChainError::OperationFailed);
            }
            self.commit_all();
            Ok(())
        })?;

        Ok(out_block)
    }

    // Utilities.
    // ------------------------------------------------------------------

    fn resolve_link(&self, tx: &Transaction) -> Option<crate::primitives::TxLink> {
        tx.metadata
            .link
            .or_else(|| self.transactions.link(&tx.hash()))
    }

    fn to_transactions(&self, links: &[crate::primitives::TxLink]) -> ChainResult<Vec<Transaction>> {
        links
            .iter()
            .map(|&link| {
                self.transactions
                    .get(link)
                    .ok_or(ChainError::OperationFailed)
            })
            .collect()
    }
}

fn overflows(fork_point: &ForkPoint, incoming: usize) -> bool {
    // Signed-safe form: compare against the remaining headroom rather
    // than summing.
    incoming as u64 > u64::from(u32::MAX) - u64::from(fork_point.height)
}
