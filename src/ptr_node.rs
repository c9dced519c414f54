//! Pointer nodes: the intrusive list entry backing every [`crate::smart_ptr::SmartPtr`].
//!
//! A `PtrNode` is heap-boxed independently of the `SmartPtr<T>` that owns it, rather than
//! embedded inline, so that an ordinary Rust move of the owning handle (returning it from a
//! function, pushing it into a `Vec`, moving it into a struct) never relocates the node's own
//! address — only the handle's `NonNull<PtrNode>` is copied, leaving the node's intrusive links
//! untouched. See `DESIGN.md` for why this deviates from the letter of "pointer operations never
//! allocate": Rust moves have no hook a C++-style move constructor could use to keep an inline,
//! address-stable node consistent.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::list::{Linked, Links, List};
use crate::mutex::CoordinationMutex;

/// One smart pointer's registration in whichever ptr list it currently belongs to (a thread
/// record's root list, or a block's member list).
pub(crate) struct PtrNode {
    links: Links<PtrNode>,
    value: AtomicPtr<()>,
    owner_mutex: AtomicPtr<CoordinationMutex>,
}

unsafe impl Linked for PtrNode {
    fn links(&self) -> &Links<Self> {
        &self.links
    }

    unsafe fn from_links(links: NonNull<Links<Self>>) -> NonNull<Self> {
        let offset = core::mem::offset_of!(PtrNode, links);
        unsafe { NonNull::new_unchecked(links.as_ptr().cast::<u8>().sub(offset).cast()) }
    }
}

/// An intrusive list of [`PtrNode`]s, rooted either at a thread record (roots) or a block
/// (members).
pub(crate) type PtrList = List<PtrNode>;

impl PtrNode {
    /// Allocates a new, dormant node (no value, no owner mutex, unlinked).
    pub(crate) fn new() -> NonNull<PtrNode> {
        let boxed = Box::new(PtrNode {
            links: Links::new(),
            value: AtomicPtr::new(std::ptr::null_mut()),
            owner_mutex: AtomicPtr::new(std::ptr::null_mut()),
        });
        NonNull::from(Box::leak(boxed))
    }

    /// Reclaims a node's heap allocation. The node must already be detached from any list.
    ///
    /// # Safety
    /// `node` must have been produced by [`PtrNode::new`] and not freed already.
    pub(crate) unsafe fn free(node: NonNull<PtrNode>) {
        drop(unsafe { Box::from_raw(node.as_ptr()) });
    }

    pub(crate) fn value(&self) -> *mut () {
        self.value.load(Ordering::Acquire)
    }

    pub(crate) fn set_value(&self, value: *mut ()) {
        self.value.store(value, Ordering::Release);
    }

    pub(crate) fn owner_mutex(&self) -> Option<NonNull<CoordinationMutex>> {
        NonNull::new(self.owner_mutex.load(Ordering::Acquire))
    }

    pub(crate) fn set_owner_mutex(&self, mutex: Option<NonNull<CoordinationMutex>>) {
        let raw = mutex.map_or(std::ptr::null_mut(), NonNull::as_ptr);
        self.owner_mutex.store(raw, Ordering::Release);
    }

    /// Registers this node into `list`, attaching `value` and recording `mutex` as the owner
    /// that serializes future reads/writes of this node.
    pub(crate) fn attach(node: NonNull<PtrNode>, list: &PtrList, mutex: NonNull<CoordinationMutex>, value: *mut ()) {
        let node_ref = unsafe { node.as_ref() };
        node_ref.set_value(value);
        node_ref.set_owner_mutex(Some(mutex));
        list.append(node);
    }

    /// Detaches this node from its current list and clears its value/owner, leaving it dormant.
    /// Used both by `SmartPtr::drop` and by the collector's sweep reset step.
    pub(crate) fn detach_and_clear(node: NonNull<PtrNode>) {
        PtrList::detach(node);
        let node_ref = unsafe { node.as_ref() };
        node_ref.set_value(std::ptr::null_mut());
        node_ref.set_owner_mutex(None);
    }
}
