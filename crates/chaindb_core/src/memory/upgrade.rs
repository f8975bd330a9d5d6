//! Three-phase reader/writer lock.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    /// Count of active shared holders.
    sharers: usize,
    /// An upgrade holder is pending promotion to shared.
    upgrader: bool,
    /// An exclusive writer holds the lock.
    exclusive: bool,
    /// Writers queued for the exclusive phase; new upgraders yield to
    /// them so a stream of readers cannot starve a writer.
    writers_waiting: usize,
}

/// A lock with upgrade, shared, and exclusive phases.
///
/// Readers acquire the upgrade phase, then atomically trade it for a shared
/// hold once their buffer is assigned. Writers acquire the exclusive phase,
/// which waits for the pending upgrader and every shared holder to drain.
/// Admitting at most one upgrader at a time keeps a stream of readers from
/// starving writers.
///
/// Lock acquisition is indefinite; there are no timeouts at this layer.
#[derive(Debug, Default)]
pub struct UpgradeLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl UpgradeLock {
    /// Creates an unlocked instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the upgrade phase, blocking while another upgrader holds
    /// the lock or a writer holds or awaits the exclusive phase.
    pub fn lock_upgrade(&self) {
        let mut state = self.state.lock();
        while state.upgrader || state.exclusive || state.writers_waiting > 0 {
            self.cond.wait(&mut state);
        }
        state.upgrader = true;
    }

    /// Releases the upgrade phase without taking a shared hold.
    pub fn unlock_upgrade(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.upgrader);
        state.upgrader = false;
        drop(state);
        self.cond.notify_all();
    }

    /// Trades the upgrade phase for a shared hold.
    pub fn unlock_upgrade_and_lock_shared(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.upgrader);
        state.upgrader = false;
        state.sharers += 1;
        drop(state);
        self.cond.notify_all();
    }

    /// Releases a shared hold.
    pub fn unlock_shared(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.sharers > 0);
        state.sharers -= 1;
        drop(state);
        self.cond.notify_all();
    }

    /// Acquires the exclusive phase, blocking until the pending upgrader
    /// and all shared holders release.
    pub fn lock_exclusive(&self) {
        let mut state = self.state.lock();
        state.writers_waiting += 1;
        while state.upgrader || state.exclusive || state.sharers > 0 {
            self.cond.wait(&mut state);
        }
        state.writers_waiting -= 1;
        state.exclusive = true;
    }

    /// Releases the exclusive phase.
    pub fn unlock_exclusive(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.exclusive);
        state.exclusive = false;
        drop(state);
        self.cond.notify_all();
    }
}
