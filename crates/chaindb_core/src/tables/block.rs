//! Block table collaborator.
//!
//! Four files back this table:
//!
//! - `block_table` - slab of header records keyed by header hash
//! - `candidate_index` - array of slab links ordered by height
//! - `confirmed_index` - array of slab links ordered by height
//! - `transaction_index` - array of transaction links referenced by
//!   header records as (start, count) ranges
//!
//! Header record format (body, little-endian):
//!
//! ```text
//! [ count:4 ]
//! per record:
//! [ header:80 ]          (version, parent, merkle_root, timestamp, bits, nonce)
//! [ median_time_past:4 ]
//! [ height:4 ]
//! [ index_state:1 ]      (0 pooled, 1 candidate, 2 confirmed)
//! [ validation:1 ]       (0 unvalidated, 1 valid, 2 failed)
//! [ code:4 ]             (zero unless failed)
//! [ tx_start:4 ]
//! [ tx_count:2 ]         (zero if block unpopulated)
//! ```
//!
//! Both index arrays are `[ count:4 ][ link:4 ]...`; the transaction
//! association array is `[ count:4 ][ link:8 ]...`.

use crate::error::ChainResult;
use crate::memory::{Accessor, Region};
use crate::primitives::{Block, Hash256, Header, InvalidReason, TxLink};
use crate::tables::encoding::{self, Reader};
use chaindb_storage::StorageBackend;
use parking_lot::RwLock;
use std::collections::HashMap;

const TABLE_MAGIC: [u8; 4] = *b"CDBK";
const CANDIDATE_MAGIC: [u8; 4] = *b"CDCI";
const CONFIRMED_MAGIC: [u8; 4] = *b"CDFI";
const TX_INDEX_MAGIC: [u8; 4] = *b"CDTI";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexState {
    Pooled,
    Candidate,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validation {
    Unvalidated,
    Valid,
    Failed(InvalidReason),
}

#[derive(Debug, Clone)]
struct BlockRecord {
    header: Header,
    median_time_past: u32,
    height: u32,
    index_state: IndexState,
    validation: Validation,
    tx_start: u32,
    tx_count: u16,
}

#[derive(Debug, Default)]
struct BlockMap {
    slab: Vec<BlockRecord>,
    index: HashMap<Hash256, u32>,
    candidate: Vec<u32>,
    confirmed: Vec<u32>,
    tx_links: Vec<TxLink>,
}

impl BlockMap {
    fn manager(&self, candidate: bool) -> &Vec<u32> {
        if candidate {
            &self.candidate
        } else {
            &self.confirmed
        }
    }
}

/// A stored block row: the header plus its store state and transaction
/// links.
#[derive(Debug, Clone)]
pub struct BlockResult {
    /// Header hash.
    pub hash: Hash256,
    /// The stored header (consensus fields only).
    pub header: Header,
    /// Height recorded at store time.
    pub height: u32,
    /// Median time past recorded at store time.
    pub median_time_past: u32,
    /// Member of the candidate index.
    pub candidate: bool,
    /// Member of the confirmed index.
    pub confirmed: bool,
    /// Validation has concluded (valid or failed).
    pub validated: bool,
    /// Why validation failed, if it did.
    pub error: Option<InvalidReason>,
    /// Links of the associated transactions in block order.
    pub tx_links: Vec<TxLink>,
}

impl BlockResult {
    /// Number of associated transactions.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.tx_links.len()
    }
}

/// The block table: header records plus the candidate and confirmed
/// height indexes.
pub struct BlockTable {
    state: RwLock<BlockMap>,
    table_region: Region,
    candidate_region: Region,
    confirmed_region: Region,
    tx_index_region: Region,
    table_file: Box<dyn StorageBackend>,
    candidate_file: Box<dyn StorageBackend>,
    confirmed_file: Box<dyn StorageBackend>,
    tx_index_file: Box<dyn StorageBackend>,
    buckets: usize,
    growth: usize,
}

impl BlockTable {
    /// Creates an unstarted table over the four backing files.
    pub fn new(
        table_file: Box<dyn StorageBackend>,
        candidate_file: Box<dyn StorageBackend>,
        confirmed_file: Box<dyn StorageBackend>,
        tx_index_file: Box<dyn StorageBackend>,
        buckets: usize,
        growth: usize,
    ) -> Self {
        Self {
            state: RwLock::new(BlockMap::default()),
            table_region: Region::new(),
            candidate_region: Region::new(),
            confirmed_region: Region::new(),
            tx_index_region: Region::new(),
            table_file,
            candidate_file,
            confirmed_file,
            tx_index_file,
            buckets,
            growth,
        }
    }

    /// Initializes an empty table and persists its images.
    pub fn create(&self) -> ChainResult<()> {
        {
            let mut state = self.state.write();
            *state = BlockMap::default();
            state.index = HashMap::with_capacity(self.buckets);
        }
        self.commit();
        self.flush()
    }

    /// Loads the table from its images.
    pub fn open(&self) -> ChainResult<()> {
        let table_image = self.table_file.read_all()?;
        let candidate_image = self.candidate_file.read_all()?;
        let confirmed_image = self.confirmed_file.read_all()?;
        let tx_index_image = self.tx_index_file.read_all()?;

        let decoded = Self::decode(
            encoding::unframe(TABLE_MAGIC, &table_image)?,
            encoding::unframe(CANDIDATE_MAGIC, &candidate_image)?,
            encoding::unframe(CONFIRMED_MAGIC, &confirmed_image)?,
            encoding::unframe(TX_INDEX_MAGIC, &tx_index_image)?,
            self.buckets,
        )?;
        *self.state.write() = decoded;
        self.commit();
        Ok(())
    }

    /// Publishes the current state to the reader regions.
    pub fn commit(&self) {
        let (table, candidate, confirmed, tx_index) = self.encode();
        self.table_region.publish(encoding::frame(TABLE_MAGIC, table));
        self.candidate_region
            .publish(encoding::frame(CANDIDATE_MAGIC, candidate));
        self.confirmed_region
            .publish(encoding::frame(CONFIRMED_MAGIC, confirmed));
        self.tx_index_region
            .publish(encoding::frame(TX_INDEX_MAGIC, tx_index));
    }

    /// Persists the published images.
    pub fn flush(&self) -> ChainResult<()> {
        self.table_file.replace(&self.table_region.snapshot())?;
        self.candidate_file
            .replace(&self.candidate_region.snapshot())?;
        self.confirmed_file
            .replace(&self.confirmed_region.snapshot())?;
        self.tx_index_file
            .replace(&self.tx_index_region.snapshot())?;

        self.table_file.sync()?;
        self.candidate_file.sync()?;
        self.confirmed_file.sync()?;
        self.tx_index_file.sync()?;
        Ok(())
    }

    /// Releases the table.
    pub fn close(&self) -> ChainResult<()> {
        Ok(())
    }

    /// Opens a scoped reader over the candidate index image.
    pub fn access_candidate(&self) -> Accessor<'_> {
        self.candidate_region.access()
    }

    /// Opens a scoped reader over the confirmed index image.
    pub fn access_confirmed(&self) -> Accessor<'_> {
        self.confirmed_region.access()
    }

    // Queries.
    // ------------------------------------------------------------------

    /// Returns the top height of the selected index, if non-empty.
    pub fn top(&self, candidate: bool) -> Option<u32> {
        let state = self.state.read();
        let count = state.manager(candidate).len();
        count.checked_sub(1).map(|top| top as u32)
    }

    /// Returns the row indexed at `height` in the selected index.
    pub fn get(&self, height: u32, candidate: bool) -> Option<BlockResult> {
        let state = self.state.read();
        let link = *state.manager(candidate).get(height as usize)?;
        Some(Self::result(&state, link))
    }

    /// Returns the row with `hash` in any state.
    pub fn get_by_hash(&self, hash: &Hash256) -> Option<BlockResult> {
        let state = self.state.read();
        let link = *state.index.get(hash)?;
        Some(Self::result(&state, link))
    }

    /// Returns true if a header with `hash` is stored.
    pub fn exists(&self, hash: &Hash256) -> bool {
        self.state.read().index.contains_key(hash)
    }

    /// Populates a header's store metadata from its row, leaving the
    /// defaults when the header is absent.
    pub fn get_header_metadata(&self, header: &mut Header) {
        let Some(result) = self.get_by_hash(&header.hash()) else {
            return;
        };

        header.metadata.exists = true;
        header.metadata.populated = result.transaction_count() != 0;
        header.metadata.validated = result.validated;
        header.metadata.candidate = result.candidate;
        header.metadata.confirmed = result.confirmed;
        header.metadata.error = result.error;
        header.metadata.median_time_past = result.median_time_past;
    }

    fn result(state: &BlockMap, link: u32) -> BlockResult {
        let record = &state.slab[link as usize];
        let start = record.tx_start as usize;
        let count = record.tx_count as usize;
        BlockResult {
            hash: record.header.hash(),
            header: record.header.clone(),
            height: record.height,
            median_time_past: record.median_time_past,
            candidate: record.index_state == IndexState::Candidate,
            confirmed: record.index_state == IndexState::Confirmed,
            validated: record.validation != Validation::Unvalidated,
            error: match record.validation {
                Validation::Failed(reason) => Some(reason),
                _ => None,
            },
            tx_links: state.tx_links[start..start + count].to_vec(),
        }
    }

    // Store.
    // ------------------------------------------------------------------

    /// Stores a header record at `height` if missing and marks the
    /// header's existence metadata.
    pub fn store(&self, header: &mut Header, height: u32, median_time_past: u32) -> bool {
        let hash = header.hash();
        let mut state = self.state.write();

        if !state.index.contains_key(&hash) {
            let link = state.slab.len() as u32;
            let mut stored = header.clone();
            stored.metadata = Default::default();
            state.slab.push(BlockRecord {
                header: stored,
                median_time_past,
                height,
                index_state: IndexState::Pooled,
                validation: Validation::Unvalidated,
                tx_start: 0,
                tx_count: 0,
            });
            state.index.insert(hash, link);
        }

        header.metadata.exists = true;
        true
    }

    /// Populates the block's transaction association; state is unchanged.
    ///
    /// Every transaction must carry its link metadata.
    pub fn update(&self, block: &Block) -> bool {
        let mut links = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            match tx.metadata.link {
                Some(link) => links.push(link),
                None => return false,
            }
        }
        if links.len() > usize::from(u16::MAX) {
            return false;
        }

        let mut state = self.state.write();
        let Some(&link) = state.index.get(&block.hash()) else {
            return false;
        };

        let tx_start = state.tx_links.len() as u32;
        let tx_count = links.len() as u16;
        state.tx_links.extend_from_slice(&links);

        let record = &mut state.slab[link as usize];
        record.tx_start = tx_start;
        record.tx_count = tx_count;
        true
    }

    /// Promotes an unvalidated header to valid (`None`) or failed
    /// (`Some(reason)`).
    pub fn validate(&self, hash: &Hash256, error: Option<InvalidReason>) -> bool {
        let mut state = self.state.write();
        let Some(&link) = state.index.get(hash) else {
            return false;
        };

        state.slab[link as usize].validation = match error {
            None => Validation::Valid,
            Some(reason) => Validation::Failed(reason),
        };
        true
    }

    /// Pushes the header with `hash` onto the top of the selected index.
    ///
    /// Refuses any height other than the next index position.
    pub fn index(&self, hash: &Hash256, height: u32, candidate: bool) -> bool {
        let mut state = self.state.write();

        if height as usize != state.manager(candidate).len() {
            return false;
        }
        let Some(&link) = state.index.get(hash) else {
            return false;
        };

        state.slab[link as usize].index_state = if candidate {
            IndexState::Candidate
        } else {
            IndexState::Confirmed
        };
        if candidate {
            state.candidate.push(link);
        } else {
            state.confirmed.push(link);
        }
        true
    }

    /// Pops the header with `hash` from the top of the selected index.
    ///
    /// Refuses any height other than the current top. Deconfirming a row
    /// that is still candidate-indexed returns it to the candidate state;
    /// otherwise the row falls back to pooled.
    pub fn unindex(&self, hash: &Hash256, height: u32, candidate: bool) -> bool {
        let mut state = self.state.write();

        if (height as usize) + 1 != state.manager(candidate).len() {
            return false;
        }
        let link = state.manager(candidate)[height as usize];
        if state.slab[link as usize].header.hash() != *hash {
            return false;
        }

        let still_candidate =
            !candidate && state.candidate.get(height as usize) == Some(&link);
        state.slab[link as usize].index_state = if still_candidate {
            IndexState::Candidate
        } else {
            IndexState::Pooled
        };
        if candidate {
            state.candidate.pop();
        } else {
            state.confirmed.pop();
        }
        true
    }

    // Encoding.
    // ------------------------------------------------------------------

    fn encode(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>) {
        let state = self.state.read();

        let estimate = 4 + state.slab.len() * 100;
        let mut table = Vec::with_capacity(estimate + estimate * self.growth / 100);
        table.extend_from_slice(&(state.slab.len() as u32).to_le_bytes());
        for record in &state.slab {
            table.extend_from_slice(&record.header.encode());
            table.extend_from_slice(&record.median_time_past.to_le_bytes());
            table.extend_from_slice(&record.height.to_le_bytes());
            table.push(match record.index_state {
                IndexState::Pooled => 0,
                IndexState::Candidate => 1,
                IndexState::Confirmed => 2,
            });
            let (validation, code) = match record.validation {
                Validation::Unvalidated => (0u8, 0u32),
                Validation::Valid => (1, 0),
                Validation::Failed(reason) => (2, reason.code()),
            };
            table.push(validation);
            table.extend_from_slice(&code.to_le_bytes());
            table.extend_from_slice(&record.tx_start.to_le_bytes());
            table.extend_from_slice(&record.tx_count.to_le_bytes());
        }

        let encode_index = |links: &[u32]| {
            let mut body = Vec::with_capacity(4 + links.len() * 4);
            body.extend_from_slice(&(links.len() as u32).to_le_bytes());
            for &link in links {
                body.extend_from_slice(&link.to_le_bytes());
            }
            body
        };
        let candidate = encode_index(&state.candidate);
        let confirmed = encode_index(&state.confirmed);

        let mut tx_index = Vec::with_capacity(4 + state.tx_links.len() * 8);
        tx_index.extend_from_slice(&(state.tx_links.len() as u32).to_le_bytes());
        for link in &state.tx_links {
            tx_index.extend_from_slice(&link.as_u64().to_le_bytes());
        }

        (table, candidate, confirmed, tx_index)
    }

    fn decode(
        table: &[u8],
        candidate: &[u8],
        confirmed: &[u8],
        tx_index: &[u8],
        buckets: usize,
    ) -> ChainResult<BlockMap> {
        use crate::error::ChainError;

        let mut slab = Vec::new();
        let mut index = HashMap::with_capacity(buckets);
        if !table.is_empty() {
            let mut reader = Reader::new(table);
            let count = reader.read_u32()? as usize;
            slab.reserve(count);
            for link in 0..count {
                let header = Header {
                    version: reader.read_u32()?,
                    parent: reader.read_hash()?,
                    merkle_root: reader.read_hash()?,
                    timestamp: reader.read_u32()?,
                    bits: reader.read_u32()?,
                    nonce: reader.read_u32()?,
                    metadata: Default::default(),
                };
                let median_time_past = reader.read_u32()?;
                let height = reader.read_u32()?;
                let index_state = match reader.read_u8()? {
                    0 => IndexState::Pooled,
                    1 => IndexState::Candidate,
                    2 => IndexState::Confirmed,
                    other => {
                        return Err(ChainError::corruption(format!(
                            "unknown index state {other}"
                        )))
                    }
                };
                let validation_tag = reader.read_u8()?;
                let code = reader.read_u32()?;
                let validation = match validation_tag {
                    0 => Validation::Unvalidated,
                    1 => Validation::Valid,
                    2 => Validation::Failed(InvalidReason::from_code(code).ok_or_else(
                        || ChainError::corruption(format!("unknown failure code {code}")),
                    )?),
                    other => {
                        return Err(ChainError::corruption(format!(
                            "unknown validation state {other}"
                        )))
                    }
                };
                let tx_start = reader.read_u32()?;
                let tx_count = reader.read_u16()?;

                index.insert(header.hash(), link as u32);
                slab.push(BlockRecord {
                    header,
                    median_time_past,
                    height,
                    index_state,
                    validation,
                    tx_start,
                    tx_count,
                });
            }
        }

        let decode_index = |body: &[u8]| -> ChainResult<Vec<u32>> {
            if body.is_empty() {
                return Ok(Vec::new());
            }
            let mut reader = Reader::new(body);
            let count = reader.read_u32()? as usize;
            let mut links = Vec::with_capacity(count);
            for _ in 0..count {
                let link = reader.read_u32()?;
                if link as usize >= slab.len() {
                    return Err(ChainError::corruption("index link out of range"));
                }
                links.push(link);
            }
            Ok(links)
        };
        let candidate = decode_index(candidate)?;
        let confirmed = decode_index(confirmed)?;

        let mut tx_links = Vec::new();
        if !tx_index.is_empty() {
            let mut reader = Reader::new(tx_index);
            let count = reader.read_u32()? as usize;
            tx_links.reserve(count);
            for _ in 0..count {
                tx_links.push(TxLink::new(reader.read_u64()?));
            }
        }

        for record in &slab {
            let end = record.tx_start as usize + record.tx_count as usize;
            if end > tx_links.len() {
                return Err(ChainError::corruption("transaction range out of bounds"));
            }
        }

        Ok(BlockMap {
            slab,
            index,
            candidate,
            confirmed,
            tx_links,
        })
    }
}

impl std::fmt::Debug for BlockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockTable")
            .field("candidate_top", &self.top(true))
            .field("confirmed_top", &self.top(false))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaindb_storage::InMemoryBackend;

    fn table() -> BlockTable {
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

    fn header(parent: Hash256, nonce: u32) -> Header {
        Header {
            version: 1,
            parent,
            merkle_root: Hash256([0x4D; 32]),
            timestamp: 1_000,
            bits: u32::MAX,
            nonce,
            metadata: Default::default(),
        }
    }

    #[test]
    fn store_and_lookup() {
        let table = table();
        let mut h = header(Hash256::ZERO, 1);

        assert!(table.store(&mut h, 0, 500));
        assert!(h.metadata.exists);
        assert!(table.exists(&h.hash()));

        let result = table.get_by_hash(&h.hash()).unwrap();
        assert_eq!(result.height, 0);
        assert_eq!(result.median_time_past, 500);
        assert!(!result.candidate);
        assert!(!result.confirmed);
        assert!(!result.validated);
    }

    #[test]
    fn index_requires_next_height() {
        let table = table();
        let mut h = header(Hash256::ZERO, 1);
        table.store(&mut h, 0, 0);

        assert!(!table.index(&h.hash(), 1, true));
        assert!(table.index(&h.hash(), 0, true));
        assert_eq!(table.top(true), Some(0));
        assert!(table.get_by_hash(&h.hash()).unwrap().candidate);
    }

    #[test]
    fn unindex_requires_top() {
        let table = table();
        let mut a = header(Hash256::ZERO, 1);
        let mut b = header(a.hash(), 2);
        table.store(&mut a, 0, 0);
        table.store(&mut b, 1, 0);
        table.index(&a.hash(), 0, true);
        table.index(&b.hash(), 1, true);

        assert!(!table.unindex(&a.hash(), 0, true));
        assert!(table.unindex(&b.hash(), 1, true));
        assert_eq!(table.top(true), Some(0));
        assert!(!table.get_by_hash(&b.hash()).unwrap().candidate);
    }

    #[test]
    fn unindex_checks_hash() {
        let table = table();
        let mut a = header(Hash256::ZERO, 1);
        let b = header(Hash256::ZERO, 2);
        table.store(&mut a, 0, 0);
        table.index(&a.hash(), 0, true);

        assert!(!table.unindex(&b.hash(), 0, true));
        assert_eq!(table.top(true), Some(0));
    }

    #[test]
    fn validate_records_failure() {
        let table = table();
        let mut h = header(Hash256::ZERO, 1);
        table.store(&mut h, 0, 0);

        assert!(table.validate(&h.hash(), Some(InvalidReason::BadProofOfWork)));
        let result = table.get_by_hash(&h.hash()).unwrap();
        assert!(result.validated);
        assert_eq!(result.error, Some(InvalidReason::BadProofOfWork));

        let mut probe = h.clone();
        table.get_header_metadata(&mut probe);
        assert!(probe.metadata.validated);
        assert_eq!(probe.metadata.error, Some(InvalidReason::BadProofOfWork));
    }

    #[test]
    fn update_associates_transactions() {
        let table = table();
        let mut h = header(Hash256::ZERO, 1);
        table.store(&mut h, 0, 0);

        let mut block = Block::new(h.clone(), vec![Default::default()]);
        block.transactions[0].metadata.link = Some(TxLink::new(42));

        assert!(table.update(&block));
        let result = table.get_by_hash(&h.hash()).unwrap();
        assert_eq!(result.tx_links, vec![TxLink::new(42)]);
    }

    #[test]
    fn update_requires_links() {
        let table = table();
        let mut h = header(Hash256::ZERO, 1);
        table.store(&mut h, 0, 0);

        let block = Block::new(h, vec![Default::default()]);
        assert!(!table.update(&block));
    }

    #[test]
    fn get_by_height_uses_selected_index() {
        let table = table();
        let mut a = header(Hash256::ZERO, 1);
        table.store(&mut a, 0, 0);
        table.index(&a.hash(), 0, true);

        assert!(table.get(0, true).is_some());
        assert!(table.get(0, false).is_none());
    }

    #[test]
    fn image_round_trip() {
        let table = table();
        let mut a = header(Hash256::ZERO, 1);
        let mut b = header(a.hash(), 2);
        table.store(&mut a, 0, 100);
        table.store(&mut b, 1, 200);
        table.index(&a.hash(), 0, true);
        table.index(&b.hash(), 1, true);
        table.index(&a.hash(), 0, false);
        table.validate(&a.hash(), None);
        table.commit();

        let (t, c, f, x) = table.encode();
        let decoded = BlockTable::decode(&t, &c, &f, &x, 16).unwrap();
        assert_eq!(decoded.slab.len(), 2);
        assert_eq!(decoded.candidate, vec![0, 1]);
        assert_eq!(decoded.confirmed, vec![0]);
        assert_eq!(decoded.slab[0].validation, Validation::Valid);
        assert_eq!(decoded.index.len(), 2);
    }

    #[test]
    fn corrupt_index_link_rejected() {
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&9u32.to_le_bytes());

        let result = BlockTable::decode(&[], &body, &[], &[], 16);
        assert!(result.is_err());
    }

    #[test]
    fn uncommitted_index_not_visible_to_accessors() {
        let table = table();
        let before = table.access_candidate().buffer().to_vec();

        let mut h = header(Hash256::ZERO, 1);
        table.store(&mut h, 0, 0);
        table.index(&h.hash(), 0, true);
        assert_eq!(table.access_candidate().buffer(), before.as_slice());

        table.commit();
        assert_ne!(table.access_candidate().buffer(), before.as_slice());
    }
}
