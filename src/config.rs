//! Configuration and statistics for the collector.

use std::time::{Duration, Instant};

/// Minimum allowed `alloc_limit`, in bytes. Large enough to hold a handful of block headers.
pub const MIN_ALLOC_LIMIT: u64 = 4 * 1024;

/// Default auto-collect delta: how far `alloc_size` must grow past the last collection's
/// `alloc_size` before an automatic collection is scheduled.
const DEFAULT_AUTO_COLLECT_DELTA: u64 = 1024 * 1024;

/// Fallback allocation limit used when total system memory cannot be determined.
const FALLBACK_ALLOC_LIMIT: u64 = 64 * 1024 * 1024;

/// Fraction of total system memory used as the default allocation limit.
const DEFAULT_MEMORY_FRACTION: f64 = 0.25;

/// Configuration for the garbage collector.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Total bytes allocated across live blocks before an automatic collection is considered.
    pub alloc_limit: u64,
    /// How far `alloc_size` must grow past the last collection's `alloc_size`, on top of
    /// exceeding `alloc_limit`, before an automatic collection is scheduled.
    pub auto_collect_delta: u64,
    /// Whether to start the background async collection worker.
    pub start_worker: bool,
}

impl Configuration {
    /// Validates a configuration, returning an error for out-of-range values.
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.alloc_limit < MIN_ALLOC_LIMIT {
            return Err(crate::error::Error::InvalidConfiguration(format!(
                "alloc_limit must be at least {MIN_ALLOC_LIMIT} bytes, got {}",
                self.alloc_limit
            )));
        }
        Ok(())
    }
}

impl Default for Configuration {
    /// Creates a default configuration for the garbage collector.
    ///
    /// `alloc_limit` defaults to 25% of total system memory when it can be determined (via
    /// [`sysinfo`]), falling back to a fixed 64 MiB otherwise. `auto_collect_delta` defaults to
    /// 1 MiB. `start_worker` defaults to `true`.
    fn default() -> Self {
        let alloc_limit = default_alloc_limit();
        Self {
            alloc_limit,
            auto_collect_delta: DEFAULT_AUTO_COLLECT_DELTA,
            start_worker: true,
        }
    }
}

fn default_alloc_limit() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total_bytes = system.total_memory();
    if total_bytes == 0 {
        return FALLBACK_ALLOC_LIMIT;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let scaled = (total_bytes as f64 * DEFAULT_MEMORY_FRACTION) as u64;
    scaled.max(MIN_ALLOC_LIMIT)
}

/// Point-in-time statistics about garbage collection activity.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    /// Number of completed collection cycles.
    pub collections_run: u64,
    /// Total number of blocks finalized and freed across all collections.
    pub objects_swept: u64,
    /// Total bytes reclaimed across all collections.
    pub bytes_freed: u64,
    /// Total bytes allocated across the collector's lifetime.
    pub bytes_allocated: u64,
    /// Wall-clock duration of the most recent collection cycle, start to finish — Freeze through
    /// Sweep, not just the time every mutator spent frozen.
    pub last_collection_duration: Option<Duration>,
    /// Sum of every collection cycle's duration.
    pub total_collection_time: Duration,
}

/// Internal mutable counterpart to [`Statistics`], updated during collection.
#[derive(Debug, Default)]
pub(crate) struct StatisticsRecorder {
    pub(crate) collections_run: u64,
    pub(crate) objects_swept: u64,
    pub(crate) bytes_freed: u64,
    pub(crate) bytes_allocated: u64,
    pub(crate) last_collection_duration: Option<Duration>,
    pub(crate) total_collection_time: Duration,
}

impl StatisticsRecorder {
    pub(crate) fn record_collection(&mut self, started_at: Instant, swept: u64, freed: u64) {
        let duration = started_at.elapsed();
        self.collections_run += 1;
        self.objects_swept += swept;
        self.bytes_freed += freed;
        self.last_collection_duration = Some(duration);
        self.total_collection_time += duration;
    }

    pub(crate) fn record_allocation(&mut self, size: u64) {
        self.bytes_allocated += size;
    }

    pub(crate) fn snapshot(&self) -> Statistics {
        Statistics {
            collections_run: self.collections_run,
            objects_swept: self.objects_swept,
            bytes_freed: self.bytes_freed,
            bytes_allocated: self.bytes_allocated,
            last_collection_duration: self.last_collection_duration,
            total_collection_time: self.total_collection_time,
        }
    }
}
