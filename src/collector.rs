//! The stop-the-world collection driver: Freeze, Gather, Mark, Partition, Resume, Sweep.
//!
//! Freeze through Resume run under the global registry mutex with every thread record's
//! coordination mutex held in collection mode, so no mutator is mid-critical-section and every
//! later lock attempt parks until `unlock_for_collection`. Sweep runs afterward, outside the
//! freeze, since finalizing and freeing an already-unreachable block has no ordering dependency
//! on any live mutator.

use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::block::{BlockHeader, BlockRef};
use crate::global::GlobalState;
use crate::list::List;
use crate::thread_record::ThreadRecord;

#[cfg(not(target_family = "wasm"))]
use rayon::prelude::*;

/// Below this many gathered blocks, a plain sequential sort beats paying for `rayon`'s
/// work-stealing setup.
const PARALLEL_SORT_THRESHOLD: usize = 4096;

/// Runs one full, synchronous collection cycle and returns the resulting `alloc_size`. A no-op,
/// returning the current `alloc_size` unchanged, if another collection is already in progress.
pub fn collect() -> u64 {
    let global = crate::global::global();
    let Some(registry_guard) = global.try_lock_registry() else {
        tracing::debug!("collection already in progress, skipping");
        return global.alloc_size.load(Ordering::Relaxed);
    };

    let started_at = Instant::now();
    let records = snapshot_records(global);

    freeze(&records);
    gather(global, &records);
    let cycle = mark(global, &records);
    let (unreachable, dead_records) = partition(global, &records);
    resume(&records);
    drop(registry_guard);

    let (swept, freed) = sweep(unreachable);
    for record in dead_records {
        unsafe { ThreadRecord::free(record) };
    }
    global.record_collection(started_at, swept, freed);

    let alloc_size = global.alloc_size.load(Ordering::Relaxed);
    tracing::debug!(cycle, swept, freed, alloc_size, "collection cycle complete");
    alloc_size
}

fn snapshot_records(global: &'static GlobalState) -> Vec<NonNull<ThreadRecord>> {
    let mut records: Vec<NonNull<ThreadRecord>> = global.active_threads().iter().collect();
    records.extend(global.terminated_threads().iter());
    records
}

fn freeze(records: &[NonNull<ThreadRecord>]) {
    for record in records {
        unsafe { record.as_ref() }.mutex.lock_for_collection();
    }
}

fn gather(global: &'static GlobalState, records: &[NonNull<ThreadRecord>]) {
    let mut all_blocks = global.all_blocks.lock();
    all_blocks.clear();
    for record in records {
        let thread_ref = unsafe { record.as_ref() };
        all_blocks.extend(thread_ref.blocks.iter().map(BlockRef));
    }
    sort_blocks(&mut all_blocks);
}

fn sort_blocks(blocks: &mut [BlockRef]) {
    #[cfg(not(target_family = "wasm"))]
    {
        if blocks.len() >= PARALLEL_SORT_THRESHOLD {
            blocks.par_sort_unstable_by_key(|b| b.addr());
            return;
        }
    }
    blocks.sort_unstable_by_key(|b| b.addr());
}

fn mark(global: &'static GlobalState, records: &[NonNull<ThreadRecord>]) -> u64 {
    let cycle = global.cycle.fetch_add(1, Ordering::Relaxed) + 1;
    global.alloc_size.store(0, Ordering::Relaxed);

    let all_blocks = global.all_blocks.lock();
    for record in records {
        let thread_ref = unsafe { record.as_ref() };
        for node in thread_ref.root_ptrs.iter() {
            let addr = unsafe { node.as_ref() }.value();
            trace(addr, &all_blocks, cycle, global);
        }
    }
    cycle
}

/// Marks the block containing `addr` (tolerating interior pointers) and every block it
/// transitively reaches, moving each from its owner's `blocks` list to `marked_blocks` exactly
/// once per cycle.
fn trace(addr: *mut (), all_blocks: &[BlockRef], cycle: u64, global: &'static GlobalState) {
    if addr.is_null() {
        return;
    }
    let addr = addr as usize;
    let Some(block) = find_block(all_blocks, addr) else {
        return;
    };
    let header = unsafe { block.as_ref() };
    if header.cycle() == cycle {
        return;
    }
    header.set_cycle(cycle);

    List::detach(block);
    let owner = unsafe { header.owner.as_ref() };
    owner.marked_blocks.append(block);
    global
        .alloc_size
        .fetch_add(header.size() as u64, Ordering::Relaxed);

    for node in header.ptr_list.iter() {
        let child_addr = unsafe { node.as_ref() }.value();
        trace(child_addr, all_blocks, cycle, global);
    }
}

/// Binary searches the address-sorted block vector for the block containing `addr`, tolerating
/// pointers into the interior of a payload. A pointer exactly at a block's start belongs to that
/// block; a pointer exactly at its end does not (it belongs to whatever follows, if anything).
fn find_block(all_blocks: &[BlockRef], addr: usize) -> Option<NonNull<BlockHeader>> {
    let idx = all_blocks.partition_point(|b| b.addr() <= addr);
    if idx == 0 {
        return None;
    }
    let candidate = all_blocks[idx - 1].0;
    if unsafe { candidate.as_ref() }.contains(addr) {
        Some(candidate)
    } else {
        None
    }
}

type PartitionResult = (Vec<BlockRef>, Vec<NonNull<ThreadRecord>>);

/// Moves each record's remaining (unmarked) `blocks` to `unreachable_blocks` and its
/// `marked_blocks` back into `blocks`, then drains the unreachable ones into a flat vector for
/// Sweep. Terminated records left with no blocks and no root pointers are detached and queued
/// for deletion.
fn partition(global: &'static GlobalState, records: &[NonNull<ThreadRecord>]) -> PartitionResult {
    let mut unreachable = Vec::new();
    let mut dead_records = Vec::new();

    for record in records {
        let thread_ref = unsafe { record.as_ref() };
        thread_ref.unreachable_blocks.append_list(&thread_ref.blocks);
        thread_ref.blocks.append_list(&thread_ref.marked_blocks);
        unreachable.extend(
            thread_ref
                .unreachable_blocks
                .drain()
                .into_iter()
                .map(BlockRef),
        );
    }

    for record in global.terminated_threads().iter().collect::<Vec<_>>() {
        let thread_ref = unsafe { record.as_ref() };
        if thread_ref.blocks.is_empty() && thread_ref.root_ptrs.is_empty() {
            List::detach(record);
            dead_records.push(record);
        }
    }

    global.all_blocks.lock().clear();
    global
        .last_collection_alloc_size
        .store(global.alloc_size.load(Ordering::Relaxed), Ordering::Relaxed);

    (unreachable, dead_records)
}

fn resume(records: &[NonNull<ThreadRecord>]) {
    for record in records.iter().rev() {
        unsafe { record.as_ref() }.mutex.unlock_for_collection();
    }
}

/// Finalizes and frees every unreachable block. Runs outside the freeze: distinct unreachable
/// blocks have no ordering dependency on each other, only on not running concurrently with a
/// live mutator, which the freeze already ruled out. Returns `(objects_swept, bytes_freed)`.
fn sweep(blocks: Vec<BlockRef>) -> (u64, u64) {
    #[cfg(not(target_family = "wasm"))]
    {
        blocks
            .into_par_iter()
            .map(sweep_one)
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
    }
    #[cfg(target_family = "wasm")]
    {
        blocks
            .into_iter()
            .map(sweep_one)
            .fold((0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
    }
}

fn sweep_one(block: BlockRef) -> (u64, u64) {
    let header_ptr = block.0;
    let header = unsafe { header_ptr.as_ref() };

    for node in header.ptr_list.iter() {
        let node_ref = unsafe { node.as_ref() };
        node_ref.set_owner_mutex(None);
        node_ref.set_value(std::ptr::null_mut());
    }

    let layout = header.layout();
    let size = header.size() as u64;
    let begin: *mut () = header.payload().as_ptr().cast();
    let end: *mut () = header.end.as_ptr().cast();
    unsafe { (header.vtable.finalize)(begin, end) };
    unsafe { (header.vtable.free)(header_ptr.as_ptr().cast(), layout) };

    (1, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::alloc;
    use crate::smart_ptr::SmartPtr;

    #[test]
    fn collecting_keeps_reachable_objects_alive() {
        let ptr = alloc(|| 42_u64).expect("alloc should succeed");
        collect();
        assert_eq!(*ptr, 42);
    }

    #[test]
    fn collecting_frees_unreachable_objects() {
        use std::cell::Cell;
        use std::rc::Rc;

        let dropped = Rc::new(Cell::new(false));
        {
            let inner = dropped.clone();
            let ptr: SmartPtr<Rc<Cell<bool>>> = alloc(move || inner).expect("alloc should succeed");
            drop(ptr);
        }
        collect();
        assert!(dropped.get());
    }

    #[test]
    fn collecting_traces_through_a_chain() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Node {
            next: Option<SmartPtr<Node>>,
            marker: Rc<Cell<bool>>,
        }

        let marker = Rc::new(Cell::new(false));
        let tail = alloc({
            let marker = marker.clone();
            move || Node {
                next: None,
                marker,
            }
        })
        .expect("alloc should succeed");
        let head = alloc(move || Node {
            next: Some(tail.clone()),
            marker: Rc::new(Cell::new(false)),
        })
        .expect("alloc should succeed");

        collect();
        assert!(!marker.get());
        assert!(head.next.is_some());
    }

    #[test]
    fn interior_pointer_keeps_the_block_alive() {
        use crate::ptr_node::PtrNode;
        use crate::thread_record;
        use std::cell::Cell;
        use std::rc::Rc;

        struct Owner {
            marker: Rc<Cell<bool>>,
            values: [u64; 4],
        }

        let marker = Rc::new(Cell::new(false));
        let owner = alloc({
            let marker = marker.clone();
            move || Owner {
                marker,
                values: [1, 2, 3, 4],
            }
        })
        .expect("alloc should succeed");

        // Fabricate a second, independent root pointer whose value is the address of
        // `values[2]` — strictly inside the block's payload, not its start.
        let interior_addr: *mut () = std::ptr::from_ref(&owner.values[2]).cast_mut().cast();
        let interior_root = {
            let thread = thread_record::current();
            let thread_ref = unsafe { thread.as_ref() };
            let list = thread_ref.root_ptr_list();
            let mutex = std::ptr::NonNull::from(&thread_ref.mutex);
            let node = PtrNode::new();
            PtrNode::attach(node, unsafe { list.as_ref() }, mutex, interior_addr);
            node
        };

        drop(owner);
        collect();
        assert!(
            !marker.get(),
            "a live interior pointer should keep the owning block reachable"
        );

        PtrNode::detach_and_clear(interior_root);
        unsafe { PtrNode::free(interior_root) };
        collect();
        assert!(marker.get());
    }
}
