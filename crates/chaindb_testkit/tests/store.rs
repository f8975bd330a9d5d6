//! End-to-end store behavior: bootstrap, linear growth, duplicate
//! rejection, address indexing, index invariants, and persistence.

use chaindb_core::memory::Accessor;
use chaindb_core::primitives::InvalidReason;
use chaindb_core::tables::TxState;
use chaindb_core::{ChainDatabase, ChainError, Settings};
use chaindb_testkit::fixtures;

fn memory_db() -> ChainDatabase {
    let db = ChainDatabase::open_in_memory(Settings::default()).unwrap();
    let mut genesis = fixtures::genesis();
    db.push(&mut genesis, 0, 0).unwrap();
    db
}

/// Index images are framed (magic, version, checksum) followed by a
/// count-prefixed link array.
fn index_count(accessor: &mut Accessor<'_>) -> u32 {
    assert!(accessor.increment(10), "image shorter than its frame");
    let bytes: [u8; 4] = accessor.buffer()[..4].try_into().unwrap();
    u32::from_le_bytes(bytes)
}

fn assert_dense_prefixes(db: &ChainDatabase) {
    for candidate in [true, false] {
        let mut accessor = if candidate {
            db.blocks().access_candidate()
        } else {
            db.blocks().access_confirmed()
        };
        let count = index_count(&mut accessor);
        assert_eq!(accessor.remaining(), 4 + count as usize * 4);

        match db.blocks().top(candidate) {
            Some(top) => assert_eq!(u64::from(top), u64::from(count) - 1),
            None => assert_eq!(count, 0),
        }

        for height in 0..count {
            assert!(
                db.blocks().get(height, candidate).is_some(),
                "index hole at height {height}"
            );
        }
    }
}

fn assert_confirmed_prefix_of_candidate(db: &ChainDatabase) {
    let Some(confirmed_top) = db.blocks().top(false) else {
        return;
    };
    for height in 0..=confirmed_top {
        let candidate = db.blocks().get(height, true).expect("candidate entry");
        let confirmed = db.blocks().get(height, false).expect("confirmed entry");
        assert_eq!(candidate.hash, confirmed.hash, "divergence at {height}");
    }
}

#[test]
fn genesis_bootstrap() {
    let db = memory_db();

    assert_eq!(db.blocks().top(true), Some(0));
    assert_eq!(db.blocks().top(false), Some(0));

    let result = db.blocks().get(0, false).unwrap();
    assert_eq!(result.height, 0);
    assert_eq!(result.transaction_count(), 1);

    assert_eq!(
        db.transactions().state(result.tx_links[0]),
        Some(TxState::Confirmed {
            height: 0,
            median_time_past: 0,
            position: 0
        })
    );
    assert_dense_prefixes(&db);
}

#[test]
fn linear_extension() {
    let db = memory_db();
    let genesis_hash = db.blocks().get(0, false).unwrap().hash;

    let mut block = fixtures::block_on(genesis_hash, 1);
    db.push(&mut block, 1, 100).unwrap();

    assert_eq!(db.blocks().top(false), Some(1));
    let link = block.transactions[0].metadata.link.unwrap();
    assert_eq!(
        db.transactions().state(link),
        Some(TxState::Confirmed {
            height: 1,
            median_time_past: 100,
            position: 0
        })
    );

    assert_dense_prefixes(&db);
    assert_confirmed_prefix_of_candidate(&db);
}

#[test]
fn long_chain_keeps_invariants() {
    let db = memory_db();
    fixtures::push_chain(&db, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

    assert_eq!(db.blocks().top(false), Some(8));
    assert_dense_prefixes(&db);
    assert_confirmed_prefix_of_candidate(&db);
}

#[test]
fn duplicate_store_rejected_and_single_row_kept() {
    let db = memory_db();

    let mut tx = fixtures::coinbase(42);
    db.store(&mut tx, 0).unwrap();
    assert!(!tx.metadata.existed);
    let rows = db.transactions().count();

    let mut again = fixtures::coinbase(42);
    let err = db.store(&mut again, 0).unwrap_err();
    assert!(matches!(err, ChainError::DuplicateTransaction));
    assert_eq!(db.transactions().count(), rows);
}

#[test]
fn invalidation_blocks_promotion() {
    let db = memory_db();
    let genesis_hash = db.blocks().get(0, false).unwrap().hash;
    let confirmed_top = db.blocks().top(false);

    let mut block = fixtures::block_on(genesis_hash, 9);
    db.push_header(&mut block.header, 1, 0).unwrap();
    db.update(&mut block, 1).unwrap();

    let mut header = block.header.clone();
    db.invalidate(&mut header, InvalidReason::BadProofOfWork)
        .unwrap();
    assert!(header.metadata.validated);

    let err = db.candidate(&mut block).unwrap_err();
    assert!(matches!(err, ChainError::ValidationFailed));
    assert_eq!(db.blocks().top(false), confirmed_top);
}

#[test]
fn address_indexing_disabled_is_noop() {
    let settings = Settings::default().index_addresses(false);
    let db = ChainDatabase::open_in_memory(settings).unwrap();
    let mut genesis = fixtures::genesis();
    db.push(&mut genesis, 0, 0).unwrap();

    assert!(db.addresses().is_none());
    db.index_transaction(&genesis.transactions[0]).unwrap();
    db.index_block(&genesis).unwrap();
}

#[test]
fn address_indexing_records_payments() {
    let db = memory_db();
    let genesis_hash = db.blocks().get(0, false).unwrap().hash;
    let pay_to = fixtures::address(0xAA);

    let coinbase = fixtures::coinbase_paying(1, pay_to);
    let mut block = fixtures::block_with(genesis_hash, 1, vec![coinbase]);
    db.push(&mut block, 1, 10).unwrap();
    db.index_block(&block).unwrap();

    let rows = db.addresses().unwrap().get(&pay_to);
    assert_eq!(rows.len(), 1);
    assert!(rows[0].output);
    assert_eq!(rows[0].data, 50 * 100_000_000);
    assert_eq!(rows[0].link, block.transactions[0].metadata.link.unwrap());
}

#[test]
fn index_transaction_skips_preexisting() {
    let db = memory_db();
    let pay_to = fixtures::address(0xBB);

    let mut tx = fixtures::coinbase_paying(7, pay_to);
    db.store(&mut tx, 0).unwrap();
    db.index_transaction(&tx).unwrap();
    assert_eq!(db.addresses().unwrap().get(&pay_to).len(), 1);

    // Storing again marks it existed; indexing is then a no-op.
    let mut again = fixtures::coinbase_paying(7, pay_to);
    assert!(matches!(
        db.store(&mut again, 0),
        Err(ChainError::DuplicateTransaction)
    ));
    again.metadata.existed = true;
    db.index_transaction(&again).unwrap();
    assert_eq!(db.addresses().unwrap().get(&pay_to).len(), 1);
}

#[test]
fn update_populates_header_ingested_ahead() {
    let db = memory_db();
    let genesis_hash = db.blocks().get(0, false).unwrap().hash;

    let mut block = fixtures::block_on(genesis_hash, 3);
    db.push_header(&mut block.header, 1, 30).unwrap();
    assert_eq!(db.blocks().get_by_hash(&block.hash()).unwrap().transaction_count(), 0);

    db.update(&mut block, 1).unwrap();
    let result = db.blocks().get_by_hash(&block.hash()).unwrap();
    assert_eq!(result.transaction_count(), 1);
    assert_eq!(
        db.transactions().state(result.tx_links[0]),
        Some(TxState::Pooled)
    );
}

#[test]
fn persistence_across_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let settings = Settings::with_directory(temp.path().join("store"));
    let tip;

    {
        let mut genesis = fixtures::genesis();
        let db = ChainDatabase::create(settings.clone(), &mut genesis).unwrap();
        let pushed = fixtures::push_chain(&db, &[1, 2]).unwrap();
        tip = pushed.last().unwrap().hash();
        db.close().unwrap();
    }

    {
        let db = ChainDatabase::open(settings).unwrap();
        assert_eq!(db.blocks().top(false), Some(2));
        assert_eq!(db.blocks().get(2, false).unwrap().hash, tip);
        assert_dense_prefixes(&db);
        assert_confirmed_prefix_of_candidate(&db);
        db.close().unwrap();
    }
}

#[test]
fn second_open_fails_while_held() {
    let temp = tempfile::tempdir().unwrap();
    let settings = Settings::with_directory(temp.path().join("store"));

    let mut genesis = fixtures::genesis();
    let db = ChainDatabase::create(settings.clone(), &mut genesis).unwrap();

    let second = ChainDatabase::open(settings.clone());
    assert!(matches!(second, Err(ChainError::StoreLockFailure)));

    db.close().unwrap();
    drop(db);
    ChainDatabase::open(settings).unwrap();
}

#[test]
fn close_is_idempotent_and_guards_operations() {
    let db = memory_db();
    db.close().unwrap();
    db.close().unwrap();

    let mut tx = fixtures::coinbase(1);
    assert!(matches!(db.store(&mut tx, 0), Err(ChainError::StoreClosed)));
    assert!(matches!(db.pop_block(0), Err(ChainError::StoreClosed)));
}
