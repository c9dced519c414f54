//! Per-thread collector state.
//!
//! Created lazily, thread-local, on first use; registered with the global registry. On thread
//! exit it is detached and, if it still holds live blocks or root pointers, handed to the
//! registry's terminated-thread list to be reclaimed by a future collection instead of being
//! freed immediately.

use std::cell::Cell;
use std::ptr::NonNull;
use std::thread::ThreadId;

use crate::block::BlockHeader;
use crate::list::{Linked, Links, List};
use crate::mutex::CoordinationMutex;
use crate::ptr_node::PtrList;

/// Collector-visible state for one thread. May outlive the thread itself (see module docs).
pub(crate) struct ThreadRecord {
    links: Links<ThreadRecord>,
    pub(crate) mutex: CoordinationMutex,
    pub(crate) root_ptrs: PtrList,
    pub(crate) blocks: List<BlockHeader>,
    pub(crate) marked_blocks: List<BlockHeader>,
    pub(crate) unreachable_blocks: List<BlockHeader>,
    cursor: Cell<NonNull<PtrList>>,
    thread_id: ThreadId,
}

unsafe impl Linked for ThreadRecord {
    fn links(&self) -> &Links<Self> {
        &self.links
    }

    unsafe fn from_links(links: NonNull<Links<Self>>) -> NonNull<Self> {
        let offset = core::mem::offset_of!(ThreadRecord, links);
        unsafe { NonNull::new_unchecked(links.as_ptr().cast::<u8>().sub(offset).cast()) }
    }
}

impl ThreadRecord {
    /// Allocates a new, registered-nowhere thread record, with its ptr-list cursor defaulted to
    /// its own root list.
    pub(crate) fn new() -> NonNull<ThreadRecord> {
        let boxed = Box::new(ThreadRecord {
            links: Links::new(),
            mutex: CoordinationMutex::new(),
            root_ptrs: List::new(),
            blocks: List::new(),
            marked_blocks: List::new(),
            unreachable_blocks: List::new(),
            cursor: Cell::new(NonNull::dangling()),
            thread_id: std::thread::current().id(),
        });
        let record = NonNull::from(Box::leak(boxed));
        let root_ptrs_ptr = unsafe { NonNull::from(&record.as_ref().root_ptrs) };
        unsafe { record.as_ref() }.cursor.set(root_ptrs_ptr);
        record
    }

    /// # Safety
    /// `record` must have been produced by [`ThreadRecord::new`], not already freed, and not
    /// currently linked into any list.
    pub(crate) unsafe fn free(record: NonNull<ThreadRecord>) {
        drop(unsafe { Box::from_raw(record.as_ptr()) });
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub(crate) fn root_ptr_list(&self) -> NonNull<PtrList> {
        NonNull::from(&self.root_ptrs)
    }

    /// The ptr list new smart-pointer registrations currently attach to: the root list, unless
    /// an allocation's constructor is in progress, in which case the allocator has redirected
    /// this to the new block's own ptr list.
    pub(crate) fn current_ptr_list(&self) -> NonNull<PtrList> {
        self.cursor.get()
    }

    pub(crate) fn set_current_ptr_list(&self, list: NonNull<PtrList>) {
        self.cursor.set(list);
    }

    /// Whether this record holds nothing a future collection would need to trace — no blocks,
    /// no marked blocks, no unreachable blocks pending sweep, and no root pointers.
    pub(crate) fn is_empty(&self) -> bool {
        self.blocks.is_empty()
            && self.marked_blocks.is_empty()
            && self.unreachable_blocks.is_empty()
            && self.root_ptrs.is_empty()
    }
}

thread_local! {
    static THREAD_RECORD: ThreadRecordHandle = ThreadRecordHandle::new();
}

struct ThreadRecordHandle {
    record: NonNull<ThreadRecord>,
}

impl Drop for ThreadRecordHandle {
    fn drop(&mut self) {
        crate::global::global().deregister_thread(self.record);
    }
}

/// Returns the calling thread's record, lazily creating and registering it on first call.
pub(crate) fn current() -> NonNull<ThreadRecord> {
    THREAD_RECORD.with(|handle| handle.record)
}

impl ThreadRecordHandle {
    fn new() -> Self {
        let record = ThreadRecord::new();
        crate::global::global().register_thread(record);
        ThreadRecordHandle { record }
    }
}

thread_local! {
    /// How many nested critical sections the calling thread has entered on its *own* thread
    /// record's mutex. A plain per-thread counter, rather than one stored on `ThreadRecord`
    /// itself, because `ThreadRecord` may be touched by other threads (the collector, or a
    /// foreign thread dropping a pointer it was handed) and a non-atomic counter must never be
    /// read or written by more than one thread.
    static LOCK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// An RAII reentrant critical section over the calling thread's own mutex. Mirrors the
/// allocator's "lock the thread mutex for the entire call" rule while tolerating the nested
/// smart-pointer registrations that happen inside an allocation's constructor closure, which
/// run on the very same thread and would otherwise self-deadlock against a plain, non-reentrant
/// lock.
pub(crate) struct CriticalSection;

impl CriticalSection {
    pub(crate) fn enter() -> Self {
        let depth = LOCK_DEPTH.with(Cell::get);
        if depth == 0 {
            unsafe { current().as_ref() }.mutex.lock();
        }
        LOCK_DEPTH.with(|cell| cell.set(depth + 1));
        CriticalSection
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        let depth = LOCK_DEPTH.with(Cell::get) - 1;
        LOCK_DEPTH.with(|cell| cell.set(depth));
        if depth == 0 {
            unsafe { current().as_ref() }.mutex.unlock();
        }
    }
}

/// Guards access to a smart pointer's *owning* thread's mutex, which may or may not be the
/// calling thread's own record (a pointer can be moved across threads, e.g. through a channel,
/// and dropped somewhere other than where it was allocated).
pub(crate) enum OwnerGuard {
    /// The owner is the calling thread's own record: reuses the reentrant critical section.
    Reentrant(CriticalSection),
    /// The owner is a different thread's record: a plain, non-reentrant lock/unlock pair.
    Raw(NonNull<CoordinationMutex>),
}

impl OwnerGuard {
    pub(crate) fn enter(owner_mutex: NonNull<CoordinationMutex>) -> Self {
        let current_mutex = NonNull::from(&unsafe { current().as_ref() }.mutex);
        if owner_mutex == current_mutex {
            OwnerGuard::Reentrant(CriticalSection::enter())
        } else {
            unsafe { owner_mutex.as_ref() }.lock();
            OwnerGuard::Raw(owner_mutex)
        }
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        if let OwnerGuard::Raw(mutex) = self {
            unsafe { mutex.as_ref() }.unlock();
        }
    }
}
