//! The chain store facade.
//!
//! `ChainDatabase` composes the three table collaborators into a single
//! transactional store. Every mutating operation runs the same bracket:
//!
//! 1. Take the process-local write mutex.
//! 2. Run the verification predicates; failures return before any write.
//! 3. Take the conditional flush lock and call `begin_write` (creating the
//!    persistent flush-lock sentinel when per-write flushing is enabled).
//! 4. Fan out the primitive operations to the tables in contract order.
//! 5. Commit the touched tables in dependency order
//!    (addresses, then transactions, then blocks).
//! 6. Call `end_write` (flush everything, then remove the sentinel).
//!
//! A primitive failure inside the bracket still attempts `end_write`; if
//! that itself fails the sentinel stays behind and the store is
//! quarantined until an operator intervenes.

mod reorganize;

use crate::error::{ChainError, ChainResult};
use crate::lock::{ExclusiveLock, FlushLock};
use crate::primitives::{Block, Header, InvalidReason, Transaction};
use crate::settings::Settings;
use crate::tables::{AddressTable, BlockTable, TransactionTable};
use crate::verify;
use chaindb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Stable file names within the store directory.
const BLOCK_TABLE: &str = "block_table";
const CANDIDATE_INDEX: &str = "candidate_index";
const CONFIRMED_INDEX: &str = "confirmed_index";
const TRANSACTION_INDEX: &str = "transaction_index";
const TRANSACTION_TABLE: &str = "transaction_table";
const ADDRESS_TABLE: &str = "address_table";
const ADDRESS_ROWS: &str = "address_rows";

/// One backend per table file.
///
/// Normal opens build these from the store directory; tests may inject
/// instrumented backends instead.
pub struct StoreBackends {
    /// Backing store for the block table.
    pub block_table: Box<dyn StorageBackend>,
    /// Backing store for the candidate index.
    pub candidate_index: Box<dyn StorageBackend>,
    /// Backing store for the confirmed index.
    pub confirmed_index: Box<dyn StorageBackend>,
    /// Backing store for the transaction association index.
    pub transaction_index: Box<dyn StorageBackend>,
    /// Backing store for the transaction table.
    pub transaction_table: Box<dyn StorageBackend>,
    /// Backing store for the address table.
    pub address_table: Box<dyn StorageBackend>,
    /// Backing store for the address rows.
    pub address_rows: Box<dyn StorageBackend>,
}

impl StoreBackends {
    /// Builds file backends at the stable names under `directory`.
    pub fn file(directory: &Path) -> ChainResult<Self> {
        Ok(Self {
            block_table: Box::new(FileBackend::open(&directory.join(BLOCK_TABLE))?),
            candidate_index: Box::new(FileBackend::open(&directory.join(CANDIDATE_INDEX))?),
            confirmed_index: Box::new(FileBackend::open(&directory.join(CONFIRMED_INDEX))?),
            transaction_index: Box::new(FileBackend::open(&directory.join(TRANSACTION_INDEX))?),
            transaction_table: Box::new(FileBackend::open(&directory.join(TRANSACTION_TABLE))?),
            address_table: Box::new(FileBackend::open(&directory.join(ADDRESS_TABLE))?),
            address_rows: Box::new(FileBackend::open(&directory.join(ADDRESS_ROWS))?),
        })
    }

    /// Builds in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            block_table: Box::new(InMemoryBackend::new()),
            candidate_index: Box::new(InMemoryBackend::new()),
            confirmed_index: Box::new(InMemoryBackend::new()),
            transaction_index: Box::new(InMemoryBackend::new()),
            transaction_table: Box::new(InMemoryBackend::new()),
            address_table: Box::new(InMemoryBackend::new()),
            address_rows: Box::new(InMemoryBackend::new()),
        }
    }
}

#[derive(Debug)]
struct StoreGuards {
    _exclusive: ExclusiveLock,
    flush: FlushLock,
}

impl StoreGuards {
    /// Acquires the directory lock and checks for a quarantined store.
    fn acquire(directory: &Path) -> ChainResult<Self> {
        let exclusive = ExclusiveLock::acquire(directory)?;
        let flush = FlushLock::new(directory);

        if flush.exists() {
            warn!(
                directory = %directory.display(),
                "flush lock present: store is quarantined"
            );
            return Err(ChainError::StoreLockFailure);
        }

        Ok(Self {
            _exclusive: exclusive,
            flush,
        })
    }
}

/// The transactional chain store.
pub struct ChainDatabase {
    settings: Settings,
    blocks: BlockTable,
    transactions: TransactionTable,
    addresses: Option<AddressTable>,
    guards: Option<StoreGuards>,
    write_mutex: Mutex<()>,
    flush_mutex: Mutex<()>,
    closed: AtomicBool,
}

impl ChainDatabase {
    // Lifecycle.
    // ------------------------------------------------------------------

    /// Creates a new store under `settings.directory` and pushes the
    /// genesis block.
    ///
    /// Not idempotent. A failure part way leaves the file system state in
    /// place for operator inspection; no rollback is attempted.
    pub fn create(settings: Settings, genesis: &mut Block) -> ChainResult<Self> {
        debug!(directory = %settings.directory.display(), "creating store");

        let guards = StoreGuards::acquire(&settings.directory)?;
        let backends = StoreBackends::file(&settings.directory)?;
        let db = Self::start(settings, backends, Some(guards));

        db.blocks.create()?;
        db.transactions.create()?;
        if let Some(addresses) = &db.addresses {
            addresses.create()?;
        }

        db.push(genesis, 0, 0)?;
        Ok(db)
    }

    /// Opens an existing store under `settings.directory`.
    ///
    /// Fails with [`ChainError::StoreLockFailure`] when another process
    /// holds the store or a flush lock from a crashed write is present.
    pub fn open(settings: Settings) -> ChainResult<Self> {
        debug!(directory = %settings.directory.display(), "opening store");

        let guards = StoreGuards::acquire(&settings.directory)?;
        let backends = StoreBackends::file(&settings.directory)?;
        Self::open_started(settings, backends, Some(guards))
    }

    /// Opens a store over caller-provided backends.
    ///
    /// Locking still uses `settings.directory`; this entry point exists so
    /// tests can inject instrumented backends.
    pub fn open_with_backends(settings: Settings, backends: StoreBackends) -> ChainResult<Self> {
        let guards = StoreGuards::acquire(&settings.directory)?;
        Self::open_started(settings, backends, Some(guards))
    }

    /// Opens a fresh, non-persistent store for testing.
    pub fn open_in_memory(settings: Settings) -> ChainResult<Self> {
        let db = Self::start(settings, StoreBackends::in_memory(), None);
        db.blocks.create()?;
        db.transactions.create()?;
        if let Some(addresses) = &db.addresses {
            addresses.create()?;
        }
        Ok(db)
    }

    fn open_started(
        settings: Settings,
        backends: StoreBackends,
        guards: Option<StoreGuards>,
    ) -> ChainResult<Self> {
        let db = Self::start(settings, backends, guards);
        db.blocks.open()?;
        db.transactions.open()?;
        if let Some(addresses) = &db.addresses {
            addresses.open()?;
        }
        Ok(db)
    }

    fn start(settings: Settings, backends: StoreBackends, guards: Option<StoreGuards>) -> Self {
        debug!(
            block_buckets = settings.block_table_buckets,
            transaction_buckets = settings.transaction_table_buckets,
            address_buckets = settings.address_table_buckets,
            "starting tables"
        );

        let blocks = BlockTable::new(
            backends.block_table,
            backends.candidate_index,
            backends.confirmed_index,
            backends.transaction_index,
            settings.block_table_buckets,
            settings.file_growth_rate,
        );

        let transactions = TransactionTable::new(
            backends.transaction_table,
            settings.transaction_table_buckets.max(settings.cache_capacity),
            settings.file_growth_rate,
        );

        let addresses = settings.index_addresses.then(|| {
            AddressTable::new(
                backends.address_table,
                backends.address_rows,
                settings.address_table_buckets,
                settings.file_growth_rate,
            )
        });

        Self {
            settings,
            blocks,
            transactions,
            addresses,
            guards,
            write_mutex: Mutex::new(()),
            flush_mutex: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Closes the store: flushes the tables and releases the locks.
    ///
    /// Idempotent and thread safe; a second call returns success.
    pub fn close(&self) -> ChainResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("closing store");

        self.flush()?;
        self.blocks.close()?;
        self.transactions.close()?;
        if let Some(addresses) = &self.addresses {
            addresses.close()?;
        }
        Ok(())
    }

    /// Flushes all tables to durable storage.
    pub fn flush(&self) -> ChainResult<()> {
        self.blocks.flush()?;
        self.transactions.flush()?;
        if let Some(addresses) = &self.addresses {
            addresses.flush()?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> ChainResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ChainError::StoreClosed)
        } else {
            Ok(())
        }
    }

    // Reader interfaces.
    // ------------------------------------------------------------------

    /// The block table.
    #[must_use]
    pub fn blocks(&self) -> &BlockTable {
        &self.blocks
    }

    /// The transaction table.
    #[must_use]
    pub fn transactions(&self) -> &TransactionTable {
        &self.transactions
    }

    /// The address table, when address indexing is enabled.
    #[must_use]
    pub fn addresses(&self) -> Option<&AddressTable> {
        self.addresses.as_ref()
    }

    /// The settings this store was opened with.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // Write barrier.
    // ------------------------------------------------------------------

    fn flush_each_write(&self) -> bool {
        self.settings.flush_writes
    }

    fn begin_write(&self) -> ChainResult<()> {
        if self.flush_each_write() {
            if let Some(guards) = &self.guards {
                guards.flush.create()?;
            }
        }
        Ok(())
    }

    fn end_write(&self) -> ChainResult<()> {
        if self.flush_each_write() {
            self.flush().map_err(|_| ChainError::StoreLockFailure)?;
            if let Some(guards) = &self.guards {
                guards.flush.remove()?;
            }
        }
        Ok(())
    }

    fn commit_all(&self) {
        if let Some(addresses) = &self.addresses {
            addresses.commit();
        }
        self.transactions.commit();
        self.blocks.commit();
    }

    fn conditional_flush_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.flush_each_write().then(|| self.flush_mutex.lock())
    }

    /// Runs `body` inside the begin/end write bracket.
    ///
    /// `end_write` is always attempted once `begin_write` succeeded; its
    /// failure overrides the body's error with `StoreLockFailure`, since
    /// the sentinel left behind is the operationally visible consequence.
    fn barrier<F>(&self, body: F) -> ChainResult<()>
    where
        F: FnOnce() -> ChainResult<()>,
    {
        let _flush_guard = self.conditional_flush_lock();

        self.begin_write()?;

        let outcome = body();
        let ended = self.end_write();

        match (outcome, ended) {
            (Ok(()), Ok(())) => Ok(()),
            (_, Err(_)) => {
                warn!("end_write failed: flush lock left in place");
                Err(ChainError::StoreLockFailure)
            }
            (Err(inner), Ok(())) => Err(inner),
        }
    }

    // Public writers.
    // ------------------------------------------------------------------

    /// Stores a transaction as unconfirmed and sets its link metadata.
    pub fn store(&self, tx: &mut Transaction, forks: u32) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(hash = %tx.hash(), "store transaction");

        let _lock = self.write_mutex.lock();
        verify::verify_transaction_missing(&self.transactions, tx)?;

        self.barrier(|| {
            if !self.transactions.store(tx, forks) {
                return Err(ChainError::OperationFailed);
            }
            self.transactions.commit();
            Ok(())
        })
    }

    /// Appends the payment rows of a stored transaction.
    ///
    /// A no-op when address indexing is disabled or the transaction was
    /// already present at store time.
    pub fn index_transaction(&self, tx: &Transaction) -> ChainResult<()> {
        self.ensure_open()?;

        if !self.settings.index_addresses || tx.metadata.existed {
            return Ok(());
        }
        trace!(hash = %tx.hash(), "index transaction");

        let _lock = self.write_mutex.lock();
        verify::verify_transaction_exists(&self.transactions, tx)?;

        self.barrier(|| {
            let addresses = self.addresses.as_ref().ok_or(ChainError::OperationFailed)?;
            if !addresses.index(tx) {
                return Err(ChainError::OperationFailed);
            }
            addresses.commit();
            Ok(())
        })
    }

    /// Appends the payment rows of a stored block's transactions.
    ///
    /// Transactions flagged as pre-existing are skipped to prevent
    /// duplicated indexing. A no-op when address indexing is disabled.
    pub fn index_block(&self, block: &Block) -> ChainResult<()> {
        self.ensure_open()?;

        if !self.settings.index_addresses {
            return Ok(());
        }
        trace!(hash = %block.hash(), "index block");

        let _lock = self.write_mutex.lock();
        verify::verify_header_exists(&self.blocks, &block.header)?;

        self.barrier(|| {
            let addresses = self.addresses.as_ref().ok_or(ChainError::OperationFailed)?;
            for tx in &block.transactions {
                if !tx.metadata.existed && !addresses.index(tx) {
                    return Err(ChainError::OperationFailed);
                }
            }
            addresses.commit();
            Ok(())
        })
    }

    /// Stores any missing transactions of an existing header and populates
    /// the block's transaction association.
    ///
    /// Validation and confirmation state are unchanged.
    pub fn update(&self, block: &mut Block, height: u32) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(hash = %block.hash(), height, "update block");

        let _lock = self.write_mutex.lock();
        verify::verify_update(&self.blocks, block, height)?;

        self.barrier(|| {
            if !self.transactions.store_all(&mut block.transactions) {
                return Err(ChainError::OperationFailed);
            }
            if !self.blocks.update(block) {
                return Err(ChainError::OperationFailed);
            }
            self.commit_all();
            Ok(())
        })
    }

    /// Marks a stored header's validation state as failed.
    pub fn invalidate(&self, header: &mut Header, reason: InvalidReason) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(hash = %header.hash(), ?reason, "invalidate header");

        let _lock = self.write_mutex.lock();
        verify::verify_header_exists(&self.blocks, header)?;

        let result = self.barrier(|| {
            if !self.blocks.validate(&header.hash(), Some(reason)) {
                return Err(ChainError::OperationFailed);
            }
            self.blocks.commit();
            Ok(())
        });

        if result.is_ok() {
            header.metadata.error = Some(reason);
            header.metadata.validated = true;
        }
        result
    }

    /// Promotes a candidate block to valid and marks its transactions and
    /// the outputs they spend as candidate.
    ///
    /// Refuses a block whose header is already marked failed.
    pub fn candidate(&self, block: &mut Block) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(hash = %block.hash(), "candidate block");

        let _lock = self.write_mutex.lock();
        verify::verify_not_failed(&self.blocks, block)?;

        let result = self.barrier(|| {
            if !self.blocks.validate(&block.hash(), None) {
                return Err(ChainError::OperationFailed);
            }
            for tx in &block.transactions {
                let link = tx.metadata.link.ok_or(ChainError::OperationFailed)?;
                if !self.transactions.candidate(link) {
                    return Err(ChainError::OperationFailed);
                }
            }
            self.transactions.commit();
            self.blocks.commit();
            Ok(())
        });

        if result.is_ok() {
            block.header.metadata.error = None;
            block.header.metadata.validated = true;
        }
        result
    }

    /// End-to-end ingestion of a presumed-valid block at `height`:
    /// store header, index candidate, store missing transactions,
    /// associate, confirm, validate, index confirmed.
    pub fn push(&self, block: &mut Block, height: u32, median_time_past: u32) -> ChainResult<()> {
        self.ensure_open()?;
        trace!(hash = %block.hash(), height, "push block");

        let _lock = self.write_mutex.lock();
        let hash = block.hash();

        self.barrier(|| {
            self.blocks.store(&mut block.header, height, median_time_past);

            if !self.blocks.index(&hash, height, true) {
                return Err(ChainError::OperationFailed);
            }
            if !self.transactions.store_all(&mut block.transactions) {
                return Err(ChainError::OperationFailed);
            }
            if !self.blocks.update(block) {
                return Err(ChainError::OperationFailed);
            }

            for (position, tx) in block.transactions.iter().enumerate() {
                let link = tx.metadata.link.ok_or(ChainError::OperationFailed)?;
                if !self
                    .transactions
                    .confirm(link, height, median_time_past, position as u32)
                {
                    return Err(ChainError::OperationFailed);
                }
            }

            if !self.blocks.validate(&hash, None) {
                return Err(ChainError::OperationFailed);
            }
            if !self.blocks.index(&hash, height, false) {
                return Err(ChainError::OperationFailed);
            }

            self.commit_all();
            Ok(())
        })
    }
}

impl std::fmt::Debug for ChainDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainDatabase")
            .field("candidate_top", &self.blocks.top(true))
            .field("confirmed_top", &self.blocks.top(false))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for ChainDatabase {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
