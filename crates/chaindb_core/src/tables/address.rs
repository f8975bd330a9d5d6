//! Address (payment) table collaborator.
//!
//! Two files back this table:
//!
//! - `address_table` - per-address row ranges:
//!   `[ count:4 ] [ address:20 row_start:4 row_count:4 ]...`
//! - `address_rows` - flat payment rows:
//!   `[ count:4 ] [ link:8 index:4 data:8 output:1 ]...`
//!
//! Rows are append-only and keyed by an already-parsed address hash.
//! Confirmation of a payment is derived from the referenced transaction's
//! current state, never stored here.

use crate::error::{ChainError, ChainResult};
use crate::memory::{Accessor, Region};
use crate::primitives::{AddressHash, Payment, Transaction, TxLink};
use crate::tables::encoding::{self, Reader};
use chaindb_storage::StorageBackend;
use parking_lot::RwLock;
use std::collections::HashMap;

const TABLE_MAGIC: [u8; 4] = *b"CDAD";
const ROWS_MAGIC: [u8; 4] = *b"CDAR";

/// The address table: payment history rows grouped by address hash.
pub struct AddressTable {
    state: RwLock<HashMap<AddressHash, Vec<Payment>>>,
    table_region: Region,
    rows_region: Region,
    table_file: Box<dyn StorageBackend>,
    rows_file: Box<dyn StorageBackend>,
    buckets: usize,
    growth: usize,
}

impl AddressTable {
    /// Creates an unstarted table over the two backing files.
    pub fn new(
        table_file: Box<dyn StorageBackend>,
        rows_file: Box<dyn StorageBackend>,
        buckets: usize,
        growth: usize,
    ) -> Self {
        Self {
            state: RwLock::new(HashMap::with_capacity(buckets)),
            table_region: Region::new(),
            rows_region: Region::new(),
            table_file,
            rows_file,
            buckets,
            growth,
        }
    }

    /// Initializes an empty table and persists its images.
    pub fn create(&self) -> ChainResult<()> {
        *self.state.write() = HashMap::with_capacity(self.buckets);
        self.commit();
        self.flush()
    }

    /// Loads the table from its images.
    pub fn open(&self) -> ChainResult<()> {
        let table_image = self.table_file.read_all()?;
        let rows_image = self.rows_file.read_all()?;

        let decoded = Self::decode(
            encoding::unframe(TABLE_MAGIC, &table_image)?,
            encoding::unframe(ROWS_MAGIC, &rows_image)?,
        )?;
        *self.state.write() = decoded;
        self.commit();
        Ok(())
    }

    /// Publishes the current state to the reader regions.
    pub fn commit(&self) {
        let (table, rows) = self.encode();
        self.table_region.publish(encoding::frame(TABLE_MAGIC, table));
        self.rows_region.publish(encoding::frame(ROWS_MAGIC, rows));
    }

    /// Persists the published images.
    pub fn flush(&self) -> ChainResult<()> {
        self.table_file.replace(&self.table_region.snapshot())?;
        self.rows_file.replace(&self.rows_region.snapshot())?;
        self.table_file.sync()?;
        self.rows_file.sync()?;
        Ok(())
    }

    /// Releases the table.
    pub fn close(&self) -> ChainResult<()> {
        Ok(())
    }

    /// Opens a scoped reader over the published rows image.
    pub fn access(&self) -> Accessor<'_> {
        self.rows_region.access()
    }

    // Store.
    // ------------------------------------------------------------------

    /// Appends one payment row under `address`.
    pub fn store(&self, address: &AddressHash, payment: Payment) {
        self.state
            .write()
            .entry(*address)
            .or_default()
            .push(payment);
    }

    /// Appends the payment rows for a stored transaction.
    ///
    /// Input rows come first (for inputs whose prevout address was parsed
    /// upstream), then output rows. The transaction must carry its link
    /// metadata.
    pub fn index(&self, tx: &Transaction) -> bool {
        let Some(link) = tx.metadata.link else {
            return false;
        };

        if !tx.is_coinbase() {
            for (index, input) in tx.inputs.iter().enumerate() {
                if let Some(address) = input.prevout_address {
                    let row = Payment::input(link, index as u32, input.prevout.checksum());
                    self.store(&address, row);
                }
            }
        }

        for (index, output) in tx.outputs.iter().enumerate() {
            if let Some(address) = output.address {
                let row = Payment::output(link, index as u32, output.value);
                self.store(&address, row);
            }
        }

        true
    }

    // Queries.
    // ------------------------------------------------------------------

    /// Returns the payment rows recorded under `address`, oldest first.
    pub fn get(&self, address: &AddressHash) -> Vec<Payment> {
        self.state
            .read()
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the total number of payment rows.
    pub fn row_count(&self) -> usize {
        self.state.read().values().map(Vec::len).sum()
    }

    // Encoding.
    // ------------------------------------------------------------------

    fn encode(&self) -> (Vec<u8>, Vec<u8>) {
        let state = self.state.read();
        let rows_total: usize = state.values().map(Vec::len).sum();

        // Address order makes the images deterministic.
        let mut entries: Vec<_> = state.iter().collect();
        entries.sort_by_key(|(address, _)| *address);

        let mut table = Vec::with_capacity(4 + state.len() * 28);
        let estimate = 4 + rows_total * Payment::ENCODED_SIZE;
        let mut rows = Vec::with_capacity(estimate + estimate * self.growth / 100);

        table.extend_from_slice(&(state.len() as u32).to_le_bytes());
        rows.extend_from_slice(&(rows_total as u32).to_le_bytes());

        let mut row_start = 0u32;
        for (address, payments) in entries {
            table.extend_from_slice(address.as_bytes());
            table.extend_from_slice(&row_start.to_le_bytes());
            table.extend_from_slice(&(payments.len() as u32).to_le_bytes());
            row_start += payments.len() as u32;

            for payment in payments {
                rows.extend_from_slice(&payment.link.as_u64().to_le_bytes());
                rows.extend_from_slice(&payment.index.to_le_bytes());
                rows.extend_from_slice(&payment.data.to_le_bytes());
                rows.push(u8::from(payment.output));
            }
        }

        (table, rows)
    }

    fn decode(table: &[u8], rows: &[u8]) -> ChainResult<HashMap<AddressHash, Vec<Payment>>> {
        let mut all_rows = Vec::new();
        if !rows.is_empty() {
            let mut reader = Reader::new(rows);
            let count = reader.read_u32()? as usize;
            all_rows.reserve(count);
            for _ in 0..count {
                let link = TxLink::new(reader.read_u64()?);
                let index = reader.read_u32()?;
                let data = reader.read_u64()?;
                let output = reader.read_u8()? != 0;
                all_rows.push(Payment {
                    link,
                    index,
                    data,
                    output,
                });
            }
        }

        let mut map = HashMap::new();
        if !table.is_empty() {
            let mut reader = Reader::new(table);
            let count = reader.read_u32()? as usize;
            for _ in 0..count {
                let address = reader.read_address()?;
                let row_start = reader.read_u32()? as usize;
                let row_count = reader.read_u32()? as usize;
                let end = row_start
                    .checked_add(row_count)
                    .filter(|&end| end <= all_rows.len())
                    .ok_or_else(|| ChainError::corruption("row range out of bounds"))?;
                map.insert(address, all_rows[row_start..end].to_vec());
            }
        }

        Ok(map)
    }
}

impl std::fmt::Debug for AddressTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressTable")
            .field("row_count", &self.row_count())
            .finish_non_exhaustive()
    }
}
