//! The collector's process-wide registry: active and terminated thread records, global
//! counters, and the handful of cross-cutting services (configuration, statistics, the async
//! worker) every other module reaches through here.

use std::ptr::NonNull;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::block::BlockRef;
use crate::config::{Configuration, Statistics, StatisticsRecorder};
use crate::error::{Error, Result};
use crate::list::List;
use crate::thread_record::ThreadRecord;
use crate::worker::Worker;

/// A `NonNull<ThreadRecord>` wrapper for the diagnostics index. Never dereferenced outside a
/// window in which the referenced thread record is known live (guarded by `registry_mutex`);
/// used only to report counts and addresses for diagnostics, never consulted by Mark or Sweep.
struct ThreadRecordRef(NonNull<ThreadRecord>);
unsafe impl Send for ThreadRecordRef {}
unsafe impl Sync for ThreadRecordRef {}

pub(crate) struct GlobalState {
    /// Guards mutation of `active_threads`/`terminated_threads` and serializes collection
    /// cycles. A collection that finds this already held means another collection is already
    /// in progress.
    registry_mutex: Mutex<()>,
    active_threads: List<ThreadRecord>,
    terminated_threads: List<ThreadRecord>,
    /// Scratch space for the block vector gathered during a collection cycle. Only ever
    /// accessed while `registry_mutex` is held by the collecting thread.
    pub(crate) all_blocks: Mutex<Vec<BlockRef>>,
    pub(crate) cycle: AtomicU64,
    pub(crate) alloc_size: AtomicU64,
    alloc_limit: AtomicU64,
    pub(crate) last_collection_alloc_size: AtomicU64,
    auto_collect_delta: AtomicU64,
    thread_index: DashMap<ThreadId, ThreadRecordRef>,
    configuration: RwLock<Configuration>,
    initialized: std::sync::atomic::AtomicBool,
    statistics: RwLock<StatisticsRecorder>,
    worker: OnceLock<Worker>,
}

unsafe impl Send for GlobalState {}
unsafe impl Sync for GlobalState {}

static GLOBAL: OnceLock<GlobalState> = OnceLock::new();

/// Returns the process-wide registry, lazily initializing it with `Configuration::default()` if
/// [`crate::init`] has not already run.
pub(crate) fn global() -> &'static GlobalState {
    let state = GLOBAL.get_or_init(|| GlobalState::new(Configuration::default()));
    if let Some(worker) = state.worker.get() {
        worker.spawn();
    }
    state
}

impl GlobalState {
    fn new(config: Configuration) -> Self {
        let alloc_limit = config.alloc_limit;
        let auto_collect_delta = config.auto_collect_delta;
        let start_worker = config.start_worker;
        let state = GlobalState {
            registry_mutex: Mutex::new(()),
            active_threads: List::new(),
            terminated_threads: List::new(),
            all_blocks: Mutex::new(Vec::new()),
            cycle: AtomicU64::new(0),
            alloc_size: AtomicU64::new(0),
            alloc_limit: AtomicU64::new(alloc_limit),
            last_collection_alloc_size: AtomicU64::new(0),
            auto_collect_delta: AtomicU64::new(auto_collect_delta),
            thread_index: DashMap::new(),
            configuration: RwLock::new(config),
            initialized: std::sync::atomic::AtomicBool::new(false),
            statistics: RwLock::new(StatisticsRecorder::default()),
            worker: OnceLock::new(),
        };
        if start_worker {
            let _ = state.worker.set(Worker::new());
        }
        state
    }

    /// Applies an explicit configuration. Errors if called after the registry has already been
    /// used (lazily or explicitly initialized) once.
    pub(crate) fn initialize(&self, config: Configuration) -> Result<()> {
        config.validate()?;
        if self
            .initialized
            .compare_exchange(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::InvalidConfiguration(
                "the collector has already been initialized".to_string(),
            ));
        }
        self.alloc_limit.store(config.alloc_limit, Ordering::Relaxed);
        self.auto_collect_delta
            .store(config.auto_collect_delta, Ordering::Relaxed);
        if config.start_worker {
            let _ = self.worker.set(Worker::new());
        }
        *self.configuration.write() = config;
        Ok(())
    }

    pub(crate) fn register_thread(&self, record: NonNull<ThreadRecord>) {
        let _guard = self.registry_mutex.lock();
        self.active_threads.append(record);
        let thread_id = unsafe { record.as_ref() }.thread_id();
        self.thread_index
            .insert(thread_id, ThreadRecordRef(record));
        tracing::debug!(?thread_id, "registered thread record");
    }

    pub(crate) fn deregister_thread(&self, record: NonNull<ThreadRecord>) {
        let _guard = self.registry_mutex.lock();
        List::detach(record);
        let thread_id = unsafe { record.as_ref() }.thread_id();
        self.thread_index.remove(&thread_id);
        if unsafe { record.as_ref() }.is_empty() {
            tracing::debug!(?thread_id, "thread record empty at exit, freeing");
            unsafe { ThreadRecord::free(record) };
        } else {
            tracing::debug!(
                ?thread_id,
                "thread record still holds live state at exit, deferring"
            );
            self.terminated_threads.append(record);
        }
    }

    pub(crate) fn active_threads(&self) -> &List<ThreadRecord> {
        &self.active_threads
    }

    pub(crate) fn terminated_threads(&self) -> &List<ThreadRecord> {
        &self.terminated_threads
    }

    pub(crate) fn try_lock_registry(&self) -> Option<parking_lot::MutexGuard<'_, ()>> {
        self.registry_mutex.try_lock()
    }

    pub(crate) fn alloc_limit(&self) -> u64 {
        self.alloc_limit.load(Ordering::Relaxed)
    }

    pub(crate) fn set_alloc_limit(&self, limit: u64) {
        self.alloc_limit.store(limit, Ordering::Relaxed);
    }

    pub(crate) fn auto_collect_delta(&self) -> u64 {
        self.auto_collect_delta.load(Ordering::Relaxed)
    }

    /// The pre-allocation heuristic from the allocator entry: should this allocation of
    /// `alloc_size_after` bytes wake the async worker?
    pub(crate) fn should_auto_collect(&self, alloc_size_after: u64) -> bool {
        let limit = self.alloc_limit();
        let last = self.last_collection_alloc_size.load(Ordering::Relaxed);
        let delta = self.auto_collect_delta();
        alloc_size_after >= limit
            && alloc_size_after > last
            && alloc_size_after - last > delta
    }

    pub(crate) fn request_async_collection(&self) {
        if let Some(worker) = self.worker.get() {
            worker.wake();
        }
    }

    pub(crate) fn statistics(&self) -> Statistics {
        self.statistics.read().snapshot()
    }

    pub(crate) fn record_allocation(&self, size: u64) {
        self.statistics.write().record_allocation(size);
    }

    pub(crate) fn record_collection(
        &self,
        started_at: std::time::Instant,
        swept: u64,
        freed: u64,
    ) {
        self.statistics
            .write()
            .record_collection(started_at, swept, freed);
    }
}
