//! Explicit, immediate deletion — bypasses the next collection cycle entirely.
//!
//! Only valid for objects obtained from [`crate::alloc`]/[`crate::alloc_finalized`]/
//! [`crate::try_alloc`] (single objects, not arrays): the block's payload offset is recomputed
//! from `T` alone, which is only sound for a block allocated with `count = 1`. Deleting an array
//! object this way will free the wrong number of bytes. Any other live [`crate::SmartPtr`]
//! referring to the same object becomes dangling; the caller is asserting none exist.

use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::block::{self, BlockHeader};
use crate::global;
use crate::list::List;
use crate::smart_ptr::SmartPtr;
use crate::thread_record::OwnerGuard;

/// Finalizes and frees `ptr`'s target immediately, without waiting for a collection. A no-op if
/// `ptr` is null.
pub fn delete<T: 'static>(ptr: SmartPtr<T>) {
    let Some(payload) = ptr.raw_value() else {
        return;
    };

    let offset = block::layout_for::<T>(1).1;
    let header_ptr: NonNull<BlockHeader> =
        unsafe { NonNull::new_unchecked(payload.as_ptr().cast::<u8>().sub(offset)).cast() };

    {
        let owner = unsafe { header_ptr.as_ref() }.owner;
        let owner_mutex = NonNull::from(&unsafe { owner.as_ref() }.mutex);
        let _guard = OwnerGuard::enter(owner_mutex);

        List::detach(header_ptr);
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

        global::global()
            .alloc_size
            .fetch_sub(size, Ordering::Relaxed);

        unsafe { (header.vtable.free)(header_ptr.as_ptr().cast(), layout) };
        tracing::trace!(size, "explicit delete freed block");
    }

    drop(ptr);
}
