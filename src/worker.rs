//! Asynchronous background collection worker.
//!
//! A single background thread, parked on a condition variable, that runs a full synchronous
//! collection whenever woken — either by the allocator's auto-collect heuristic or by an
//! explicit [`crate::collect_async`] call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

struct Flags {
    wake_requested: bool,
    shutdown: bool,
}

pub(crate) struct Worker {
    flags: Mutex<Flags>,
    condvar: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
    spawned: AtomicBool,
}

impl Worker {
    pub(crate) fn new() -> Self {
        Worker {
            flags: Mutex::new(Flags {
                wake_requested: false,
                shutdown: false,
            }),
            condvar: Condvar::new(),
            handle: Mutex::new(None),
            spawned: AtomicBool::new(false),
        }
    }

    /// Spawns the background thread the first time this is called; a no-op on later calls.
    /// Requires a `'static` reference since the spawned thread outlives the caller's stack
    /// frame.
    pub(crate) fn spawn(&'static self) {
        if self
            .spawned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let handle = std::thread::Builder::new()
            .name("gcore-collector".to_string())
            .spawn(move || self.run())
            .expect("failed to spawn collector worker thread");
        *self.handle.lock() = Some(handle);
    }

    fn run(&self) {
        loop {
            let mut flags = self.flags.lock();
            while !flags.wake_requested && !flags.shutdown {
                self.condvar.wait(&mut flags);
            }
            if flags.shutdown {
                return;
            }
            flags.wake_requested = false;
            drop(flags);
            tracing::debug!("async worker triggering collection");
            crate::collector::collect();
        }
    }

    pub(crate) fn wake(&self) {
        let mut flags = self.flags.lock();
        flags.wake_requested = true;
        self.condvar.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn shutdown(&self) {
        let mut flags = self.flags.lock();
        flags.shutdown = true;
        self.condvar.notify_one();
        drop(flags);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}
