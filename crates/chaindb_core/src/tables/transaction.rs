//! Transaction table collaborator.
//!
//! Record format (body, little-endian):
//!
//! ```text
//! [ count:4 ]
//! per record:
//! [ version:4 ]
//! [ input_count:4 ] [ prevout_hash:32 prevout_index:4 ]...
//! [ output_count:4 ] [ value:8 addr_tag:1 (addr:20) cand_spend:1 spent_tag:1 (spent_height:4) ]...
//! [ lock_time:4 ]
//! [ forks:4 ]
//! [ state:1 ] (0 pooled, 1 candidate, 2 confirmed)
//! [ height:4 mtp:4 position:4 ] (confirmed only)
//! ```
//!
//! Rows are append-only; links are slab positions and never reused. The
//! hash index is rebuilt from record content on open.

use crate::error::ChainResult;
use crate::memory::{Accessor, Region};
use crate::primitives::{Hash256, Input, OutPoint, Output, Transaction, TxLink};
use crate::tables::encoding::{self, Reader};
use chaindb_storage::StorageBackend;
use parking_lot::RwLock;
use std::collections::HashMap;

const MAGIC: [u8; 4] = *b"CDTX";

/// Confirmation state of a stored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Stored but not part of any index.
    Pooled,
    /// Part of a candidate block.
    Candidate,
    /// Confirmed at a height with block position.
    Confirmed {
        /// Confirmation height.
        height: u32,
        /// Median time past of the confirming block.
        median_time_past: u32,
        /// Position within the confirming block.
        position: u32,
    },
}

#[derive(Debug, Clone)]
struct OutputRecord {
    output: Output,
    candidate_spend: bool,
    spent_height: Option<u32>,
}

#[derive(Debug, Clone)]
struct TxRecord {
    version: u32,
    prevouts: Vec<OutPoint>,
    outputs: Vec<OutputRecord>,
    lock_time: u32,
    forks: u32,
    state: TxState,
}

impl TxRecord {
    fn to_transaction(&self) -> Transaction {
        Transaction {
            version: self.version,
            inputs: self.prevouts.iter().copied().map(Input::new).collect(),
            outputs: self.outputs.iter().map(|record| record.output).collect(),
            lock_time: self.lock_time,
            metadata: Default::default(),
        }
    }

    fn hash(&self) -> Hash256 {
        self.to_transaction().hash()
    }
}

#[derive(Debug, Default)]
struct TxMap {
    slab: Vec<TxRecord>,
    index: HashMap<Hash256, u64>,
}

/// The transaction table: append-only rows keyed by transaction hash.
pub struct TransactionTable {
    state: RwLock<TxMap>,
    region: Region,
    file: Box<dyn StorageBackend>,
    buckets: usize,
    growth: usize,
}

impl TransactionTable {
    /// Creates an unstarted table over `file`.
    pub fn new(file: Box<dyn StorageBackend>, buckets: usize, growth: usize) -> Self {
        Self {
            state: RwLock::new(TxMap::default()),
            region: Region::new(),
            file,
            buckets,
            growth,
        }
    }

    /// Initializes an empty table and persists its image.
    pub fn create(&self) -> ChainResult<()> {
        {
            let mut state = self.state.write();
            state.slab = Vec::new();
            state.index = HashMap::with_capacity(self.buckets);
        }
        self.commit();
        self.flush()
    }

    /// Loads the table from its image.
    pub fn open(&self) -> ChainResult<()> {
        let image = self.file.read_all()?;
        let body = encoding::unframe(MAGIC, &image)?;
        let decoded = Self::decode(body, self.buckets)?;
        *self.state.write() = decoded;
        self.commit();
        Ok(())
    }

    /// Publishes the current state to the reader region.
    pub fn commit(&self) {
        let image = encoding::frame(MAGIC, self.encode());
        self.region.publish(image);
    }

    /// Persists the published image.
    pub fn flush(&self) -> ChainResult<()> {
        self.file.replace(&self.region.snapshot())?;
        self.file.sync()?;
        Ok(())
    }

    /// Releases the table. The image is already durable or pending the
    /// caller's flush policy.
    pub fn close(&self) -> ChainResult<()> {
        Ok(())
    }

    /// Opens a scoped reader over the published image.
    pub fn access(&self) -> Accessor<'_> {
        self.region.access()
    }

    // Store.
    // ------------------------------------------------------------------

    /// Stores `tx` as pooled if missing and always sets its link metadata.
    ///
    /// An existing transaction is left untouched and flagged
    /// `metadata.existed`.
    pub fn store(&self, tx: &mut Transaction, forks: u32) -> bool {
        let hash = tx.hash();
        let mut state = self.state.write();

        if let Some(&link) = state.index.get(&hash) {
            tx.metadata.link = Some(TxLink::new(link));
            tx.metadata.existed = true;
            return true;
        }

        let link = state.slab.len() as u64;
        state.slab.push(TxRecord {
            version: tx.version,
            prevouts: tx.inputs.iter().map(|input| input.prevout).collect(),
            outputs: tx
                .outputs
                .iter()
                .map(|&output| OutputRecord {
                    output,
                    candidate_spend: false,
                    spent_height: None,
                })
                .collect(),
            lock_time: tx.lock_time,
            forks,
            state: TxState::Pooled,
        });
        state.index.insert(hash, link);

        tx.metadata.link = Some(TxLink::new(link));
        tx.metadata.existed = false;
        true
    }

    /// Stores any missing transactions and sets link metadata for all.
    pub fn store_all(&self, txs: &mut [Transaction]) -> bool {
        txs.iter_mut().all(|tx| self.store(tx, 0))
    }

    // State transitions.
    // ------------------------------------------------------------------

    /// Marks the transaction and the outputs it spends as candidate.
    pub fn candidate(&self, link: TxLink) -> bool {
        self.transition(link, TxState::Candidate, SpendMark::Candidate(true))
    }

    /// Reverses a candidate marking.
    pub fn uncandidate(&self, link: TxLink) -> bool {
        self.transition(link, TxState::Pooled, SpendMark::Candidate(false))
    }

    /// Confirms the transaction at (height, median time past, position) and
    /// records the spend height on the outputs it spends.
    pub fn confirm(&self, link: TxLink, height: u32, median_time_past: u32, position: u32) -> bool {
        self.transition(
            link,
            TxState::Confirmed {
                height,
                median_time_past,
                position,
            },
            SpendMark::Spent(Some(height)),
        )
    }

    /// Reverses a confirmation back to pooled and unspends the prevouts.
    pub fn unconfirm(&self, link: TxLink) -> bool {
        self.transition(link, TxState::Pooled, SpendMark::Spent(None))
    }

    fn transition(&self, link: TxLink, next: TxState, mark: SpendMark) -> bool {
        let mut state = self.state.write();

        let prevouts = match state.slab.get_mut(link.as_u64() as usize) {
            Some(record) => {
                record.state = next;
                record.prevouts.clone()
            }
            None => return false,
        };

        for prevout in prevouts {
            if prevout.is_null() {
                continue;
            }
            // Unknown prevouts (checkpoint sync) have no row to mark.
            let Some(&spent_link) = state.index.get(&prevout.hash) else {
                continue;
            };
            let record = &mut state.slab[spent_link as usize];
            let Some(output) = record.outputs.get_mut(prevout.index as usize) else {
                return false;
            };
            match mark {
                SpendMark::Candidate(value) => output.candidate_spend = value,
                SpendMark::Spent(height) => output.spent_height = height,
            }
        }

        true
    }

    // Queries.
    // ------------------------------------------------------------------

    /// Returns the transaction at `link` with its link metadata set.
    pub fn get(&self, link: TxLink) -> Option<Transaction> {
        let state = self.state.read();
        let record = state.slab.get(link.as_u64() as usize)?;
        let mut tx = record.to_transaction();
        tx.metadata.link = Some(link);
        tx.metadata.existed = true;
        Some(tx)
    }

    /// Returns the link of the transaction with `hash`.
    pub fn link(&self, hash: &Hash256) -> Option<TxLink> {
        self.state.read().index.get(hash).copied().map(TxLink::new)
    }

    /// Returns true if a transaction with `hash` is stored.
    pub fn exists(&self, hash: &Hash256) -> bool {
        self.state.read().index.contains_key(hash)
    }

    /// Returns the confirmation state of the transaction at `link`.
    pub fn state(&self, link: TxLink) -> Option<TxState> {
        self.state
            .read()
            .slab
            .get(link.as_u64() as usize)
            .map(|record| record.state)
    }

    /// Returns whether the output at `prevout` is marked candidate-spent
    /// and/or spent, if the prevout transaction is stored.
    pub fn spend_marks(&self, prevout: &OutPoint) -> Option<(bool, Option<u32>)> {
        let state = self.state.read();
        let link = *state.index.get(&prevout.hash)?;
        let record = state.slab.get(link as usize)?;
        let output = record.outputs.get(prevout.index as usize)?;
        Some((output.candidate_spend, output.spent_height))
    }

    /// Returns the number of stored rows.
    pub fn count(&self) -> usize {
        self.state.read().slab.len()
    }

    // Encoding.
    // ------------------------------------------------------------------

    fn encode(&self) -> Vec<u8> {
        let state = self.state.read();
        let estimate = 4 + state.slab.len() * 96;
        let mut body = Vec::with_capacity(estimate + estimate * self.growth / 100);

        body.extend_from_slice(&(state.slab.len() as u32).to_le_bytes());
        for record in &state.slab {
            body.extend_from_slice(&record.version.to_le_bytes());
            body.extend_from_slice(&(record.prevouts.len() as u32).to_le_bytes());
            for prevout in &record.prevouts {
                body.extend_from_slice(prevout.hash.as_bytes());
                body.extend_from_slice(&prevout.index.to_le_bytes());
            }
            body.extend_from_slice(&(record.outputs.len() as u32).to_le_bytes());
            for output in &record.outputs {
                body.extend_from_slice(&output.output.value.to_le_bytes());
                match output.output.address {
                    Some(address) => {
                        body.push(1);
                        body.extend_from_slice(address.as_bytes());
                    }
                    None => body.push(0),
                }
                body.push(u8::from(output.candidate_spend));
                match output.spent_height {
                    Some(height) => {
                        body.push(1);
                        body.extend_from_slice(&height.to_le_bytes());
                    }
                    None => body.push(0),
                }
            }
            body.extend_from_slice(&record.lock_time.to_le_bytes());
            body.extend_from_slice(&record.forks.to_le_bytes());
            match record.state {
                TxState::Pooled => body.push(0),
                TxState::Candidate => body.push(1),
                TxState::Confirmed {
                    height,
                    median_time_past,
                    position,
                } => {
                    body.push(2);
                    body.extend_from_slice(&height.to_le_bytes());
                    body.extend_from_slice(&median_time_past.to_le_bytes());
                    body.extend_from_slice(&position.to_le_bytes());
                }
            }
        }

        body
    }

    fn decode(body: &[u8], buckets: usize) -> ChainResult<TxMap> {
        if body.is_empty() {
            return Ok(TxMap {
                slab: Vec::new(),
                index: HashMap::with_capacity(buckets),
            });
        }

        let mut reader = Reader::new(body);
        let count = reader.read_u32()? as usize;
        let mut slab = Vec::with_capacity(count);
        let mut index = HashMap::with_capacity(buckets.max(count));

        for link in 0..count {
            let version = reader.read_u32()?;

            let input_count = reader.read_u32()? as usize;
            let mut prevouts = Vec::with_capacity(input_count);
            for _ in 0..input_count {
                let hash = reader.read_hash()?;
                let prevout_index = reader.read_u32()?;
                prevouts.push(OutPoint {
                    hash,
                    index: prevout_index,
                });
            }

            let output_count = reader.read_u32()? as usize;
            let mut outputs = Vec::with_capacity(output_count);
            for _ in 0..output_count {
                let value = reader.read_u64()?;
                let address = match reader.read_u8()? {
                    0 => None,
                    _ => Some(reader.read_address()?),
                };
                let candidate_spend = reader.read_u8()? != 0;
                let spent_height = match reader.read_u8()? {
                    0 => None,
                    _ => Some(reader.read_u32()?),
                };
                outputs.push(OutputRecord {
                    output: Output { value, address },
                    candidate_spend,
                    spent_height,
                });
            }

            let lock_time = reader.read_u32()?;
            let forks = reader.read_u32()?;
            let state = match reader.read_u8()? {
                0 => TxState::Pooled,
                1 => TxState::Candidate,
                2 => TxState::Confirmed {
                    height: reader.read_u32()?,
                    median_time_past: reader.read_u32()?,
                    position: reader.read_u32()?,
                },
                other => {
                    return Err(crate::error::ChainError::corruption(format!(
                        "unknown transaction state {other}"
                    )))
                }
            };

            let record = TxRecord {
                version,
                prevouts,
                outputs,
                lock_time,
                forks,
                state,
            };
            index.insert(record.hash(), link as u64);
            slab.push(record);
        }

        Ok(TxMap { slab, index })
    }
}

impl std::fmt::Debug for TransactionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTable")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum SpendMark {
    Candidate(bool),
    Spent(Option<u32>),
}
