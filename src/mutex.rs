//! Two-mode coordination mutex.
//!
//! Mutators take the fast, spin-contended path through [`CoordinationMutex::lock`]. Once the
//! collector calls [`CoordinationMutex::lock_for_collection`], it sets a collector-request flag;
//! every mutator that then arrives at `lock` parks on a condition variable instead of spinning,
//! and wakes only when the collector calls [`CoordinationMutex::unlock_for_collection`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A lock held briefly by mutator threads and, for the duration of a whole collection cycle, by
/// the collector.
#[derive(Debug)]
pub(crate) struct CoordinationMutex {
    locked: AtomicBool,
    collector_requested: AtomicBool,
    parked: Mutex<()>,
    condvar: Condvar,
}

impl CoordinationMutex {
    pub(crate) fn new() -> Self {
        CoordinationMutex {
            locked: AtomicBool::new(false),
            collector_requested: AtomicBool::new(false),
            parked: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Acquires the mutex as a mutator. Spins while uncontended; parks cooperatively once the
    /// collector has requested exclusive access.
    pub(crate) fn lock(&self) {
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            if self.collector_requested.load(Ordering::Acquire) {
                let mut guard = self.parked.lock();
                if self.collector_requested.load(Ordering::Acquire) {
                    self.condvar.wait_for(&mut guard, Duration::from_millis(50));
                }
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Releases a mutex held via [`CoordinationMutex::lock`]. Does not wake parked waiters —
    /// only the collector's `unlock_for_collection` does that, since mutators never park on a
    /// mutex that the collector does not currently hold.
    pub(crate) fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Acquires the mutex unconditionally for the collector, ignoring the collector-request
    /// flag (only the collector ever calls this, and only one collection runs at a time), then
    /// raises the flag so that any mutator arriving at `lock` after this call parks rather than
    /// spins.
    pub(crate) fn lock_for_collection(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        self.collector_requested.store(true, Ordering::Release);
    }

    /// Releases a mutex held via [`CoordinationMutex::lock_for_collection`] and wakes every
    /// mutator parked waiting for it.
    pub(crate) fn unlock_for_collection(&self) {
        self.collector_requested.store(false, Ordering::Release);
        self.locked.store(false, Ordering::Release);
        let _guard = self.parked.lock();
        self.condvar.notify_all();
    }
}

impl Default for CoordinationMutex {
    fn default() -> Self {
        CoordinationMutex::new()
    }
}
