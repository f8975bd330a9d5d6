//! Crash and quarantine behavior around the flush-lock barrier.

use chaindb_core::{ChainDatabase, ChainError, Settings, StoreBackends};
use chaindb_storage::InMemoryBackend;
use chaindb_testkit::fixtures;
use chaindb_testkit::FaultBackend;
use std::path::Path;

/// Builds file backends with a fault-injecting wrapper around the
/// transaction table file.
fn faulted_backends(
    directory: &Path,
) -> (StoreBackends, std::sync::Arc<chaindb_testkit::FaultFlags>) {
    let mut backends = StoreBackends::file(directory).unwrap();

    let inner = std::mem::replace(
        &mut backends.transaction_table,
        Box::new(InMemoryBackend::new()),
    );
    let fault = FaultBackend::new(inner);
    let flags = fault.flags();
    backends.transaction_table = Box::new(fault);

    (backends, flags)
}

fn flush_lock_path(directory: &Path) -> std::path::PathBuf {
    directory.join("flush_lock")
}

#[test]
fn flush_lock_absent_between_writes() {
    let temp = tempfile::tempdir().unwrap();
    let directory = temp.path().join("store");
    let settings = Settings::with_directory(&directory).flush_writes(true);

    let mut genesis = fixtures::genesis();
    let db = ChainDatabase::create(settings, &mut genesis).unwrap();

    fixtures::push_chain(&db, &[1]).unwrap();
    assert!(!flush_lock_path(&directory).exists());
    db.close().unwrap();
}

#[test]
fn failed_end_write_quarantines_store() {
    let temp = tempfile::tempdir().unwrap();
    let directory = temp.path().join("store");
    let settings = Settings::with_directory(&directory).flush_writes(true);

    {
        let (backends, flags) = faulted_backends(&directory);
        let db = ChainDatabase::open_with_backends(settings.clone(), backends).unwrap();

        let mut genesis = fixtures::genesis();
        db.push(&mut genesis, 0, 0).unwrap();
        assert!(!flush_lock_path(&directory).exists());

        // The next write's end_write flush fails: the sentinel stays.
        flags.fail_sync(true);
        let mut next = fixtures::block_on(genesis.hash(), 1);
        let err = db.push(&mut next, 1, 10).unwrap_err();
        assert!(matches!(err, ChainError::StoreLockFailure));
        assert!(flush_lock_path(&directory).exists());
    }

    // Restart: the store refuses to open.
    let reopen = ChainDatabase::open(settings.clone());
    assert!(matches!(reopen, Err(ChainError::StoreLockFailure)));

    // Operator inspects the tables and force-removes the sentinel.
    std::fs::remove_file(flush_lock_path(&directory)).unwrap();
    let db = ChainDatabase::open(settings).unwrap();
    assert_eq!(db.blocks().top(true), Some(1));
    db.close().unwrap();
}

#[test]
fn failed_primitive_still_ends_write() {
    let temp = tempfile::tempdir().unwrap();
    let directory = temp.path().join("store");
    let settings = Settings::with_directory(&directory).flush_writes(true);

    let mut genesis = fixtures::genesis();
    let db = ChainDatabase::create(settings, &mut genesis).unwrap();

    // Duplicate push: the candidate index refuses height 0 inside the
    // barrier, end_write still runs, and the sentinel comes off.
    let mut duplicate = fixtures::genesis();
    let err = db.push(&mut duplicate, 0, 0).unwrap_err();
    assert!(matches!(err, ChainError::OperationFailed));
    assert!(!flush_lock_path(&directory).exists());

    // The store remains usable.
    fixtures::push_chain(&db, &[1]).unwrap();
    db.close().unwrap();
}

#[test]
fn batched_mode_defers_persistence_between_barriers() {
    let temp = tempfile::tempdir().unwrap();
    let directory = temp.path().join("store");
    let settings = Settings::with_directory(&directory).flush_writes(false);

    let mut genesis = fixtures::genesis();
    let db = ChainDatabase::create(settings.clone(), &mut genesis).unwrap();
    db.flush().unwrap();

    // Without per-write flushing the on-disk images do not move; a crash
    // here would lose the pushes but reopen the pre-push store cleanly.
    let before = std::fs::read(directory.join("candidate_index")).unwrap();
    fixtures::push_chain(&db, &[1, 2]).unwrap();
    let after = std::fs::read(directory.join("candidate_index")).unwrap();
    assert_eq!(before, after);
    assert!(!flush_lock_path(&directory).exists());

    // An explicit flush persists them.
    db.flush().unwrap();
    let flushed = std::fs::read(directory.join("candidate_index")).unwrap();
    assert_ne!(before, flushed);

    db.close().unwrap();
    drop(db);

    let db = ChainDatabase::open(settings).unwrap();
    assert_eq!(db.blocks().top(false), Some(2));
    db.close().unwrap();
}

#[test]
fn create_on_quarantined_directory_fails() {
    let temp = tempfile::tempdir().unwrap();
    let directory = temp.path().join("store");
    std::fs::create_dir_all(&directory).unwrap();
    std::fs::write(flush_lock_path(&directory), b"").unwrap();

    let settings = Settings::with_directory(&directory);
    let mut genesis = fixtures::genesis();
    let result = ChainDatabase::create(settings, &mut genesis);
    assert!(matches!(result, Err(ChainError::StoreLockFailure)));
}
