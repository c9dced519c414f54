//! # gcore
//!
//! A precise, non-moving, stop-the-world tracing garbage collector embedded in a native Rust
//! application — not a separate process or runtime, just a library a program links against to
//! manage a heap of its own objects alongside Rust's ordinary stack and `Box` allocations.
//!
//! ## Overview
//!
//! [`SmartPtr<T>`] is the handle: a garbage-collected reference, constructed via [`alloc`],
//! [`try_alloc`], or [`alloc_array`]. Objects a `SmartPtr` can reach, directly or transitively
//! through fields that are themselves `SmartPtr`s, stay alive. Everything else is reclaimed the
//! next time [`collect`] runs.
//!
//! ### Collection model
//!
//! Collection is synchronous and stop-the-world by design, not incremental: a cycle freezes
//! every participating thread at a safepoint (nothing runs mid-allocation or mid-pointer-update),
//! marks from each thread's root set, and resumes every thread before the (now strictly
//! off-to-the-side) sweep of unreachable objects even begins. This trades the sub-millisecond
//! pause times a concurrent collector chases for a much smaller synchronization surface: no write
//! barriers, no tri-color invariants to maintain across a running mutator, no snapshot-at-the-
//! beginning subtleties. See [`collect`] for the full Freeze/Gather/Mark/Partition/Resume/Sweep
//! sequence.
//!
//! Collection also never moves an object — a `SmartPtr<T>`'s target keeps one address for its
//! entire lifetime, so application code may freely take and store raw pointers into its fields
//! for the duration they're known reachable.
//!
//! ### Threads
//!
//! Every thread that allocates gets its own lazily-created bookkeeping record on first use. A
//! collection cycle visits every thread's record — active or already exited but still holding
//! live blocks — so garbage-collected objects can safely outlive the thread that allocated them.
//!
//! ### Automatic and explicit collection
//!
//! An allocation that pushes total live bytes past [`Configuration::alloc_limit`] wakes a
//! background worker thread to run a collection asynchronously; [`collect`] and [`collect_async`]
//! trigger one directly. [`delete`] reclaims a single object immediately, bypassing the next
//! cycle entirely, for callers that already know an object is done.
//!
//! ## Configuration
//!
//! Call [`init`] once, early in `main`, to override the defaults (allocation threshold, whether
//! the background worker runs at all). Skipping it is fine — the collector lazily initializes
//! with [`Configuration::default()`] on first use.

#![allow(dead_code)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_in_result)]
#![deny(clippy::unwrap_used)]

mod alloc;
mod block;
mod collector;
mod config;
mod delete;
mod error;
mod finalize;
mod global;
mod list;
mod mutex;
mod ptr_node;
mod smart_ptr;
mod thread_record;
mod vtable;
mod worker;

pub use alloc::{alloc, alloc_array, alloc_array_finalized, alloc_finalized, try_alloc};
pub use config::{Configuration, Statistics};
pub use delete::delete;
pub use error::{Error, Result};
pub use finalize::Finalize;
pub use smart_ptr::SmartPtr;

use std::sync::atomic::Ordering;

/// Applies an explicit configuration. Must be called before the first allocation or collection;
/// returns [`Error::InvalidConfiguration`] if called twice, or if `config` is out of range (see
/// [`Configuration`]).
///
/// # Errors
/// Returns [`Error::InvalidConfiguration`] if the collector was already initialized — explicitly
/// or lazily, by an allocation that ran first — or if `config.alloc_limit` is below the minimum.
pub fn init(config: Configuration) -> Result<()> {
    global::global().initialize(config)
}

/// Runs one full, synchronous collection cycle and returns the resulting total live byte count.
/// A no-op, returning the current count unchanged, if another collection is already underway on
/// another thread.
pub fn collect() -> u64 {
    collector::collect()
}

/// Wakes the background collection worker to run a cycle asynchronously. A no-op if
/// [`Configuration::start_worker`] is `false`.
pub fn collect_async() {
    global::global().request_async_collection();
}

/// Total bytes currently attributed to live, collector-managed blocks.
#[must_use]
pub fn alloc_size() -> u64 {
    global::global().alloc_size.load(Ordering::Relaxed)
}

/// The current automatic-collection threshold, in bytes.
#[must_use]
pub fn alloc_limit() -> u64 {
    global::global().alloc_limit()
}

/// Overrides the automatic-collection threshold, in bytes, without reinitializing the rest of
/// the configuration.
pub fn set_alloc_limit(limit: u64) {
    global::global().set_alloc_limit(limit);
}

/// A point-in-time snapshot of collection activity.
#[must_use]
pub fn statistics() -> Statistics {
    global::global().statistics()
}
