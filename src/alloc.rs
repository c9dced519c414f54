//! Allocator entry points: `alloc`, `try_alloc`, `alloc_array`.
//!
//! Each call locks the current thread's coordination mutex for its entire duration (entered
//! reentrantly, so smart pointers constructed inside the init closure can register without
//! self-deadlocking), redirects the thread's ptr-list cursor to the new block's own list while
//! the closure runs, and rolls every side effect back — in reverse order — if construction
//! fails.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crate::block::{self, BlockHeader};
use crate::error::{Error, Result};
use crate::global::{self, GlobalState};
use crate::list::List;
use crate::ptr_node::PtrList;
use crate::smart_ptr::SmartPtr;
use crate::thread_record::{self, CriticalSection, ThreadRecord};
use crate::vtable::{
    VTable, vtable_for, vtable_for_array, vtable_for_array_finalized, vtable_for_finalized,
};

/// Restores a thread's ptr-list cursor on scope exit, whether the allocator body returns
/// normally, returns an error, or the `init` closure panics.
struct CursorGuard<'a> {
    thread_ref: &'a ThreadRecord,
    saved: NonNull<PtrList>,
}

impl<'a> CursorGuard<'a> {
    fn enter(thread_ref: &'a ThreadRecord, new_cursor: NonNull<PtrList>) -> Self {
        let saved = thread_ref.current_ptr_list();
        thread_ref.set_current_ptr_list(new_cursor);
        CursorGuard { thread_ref, saved }
    }
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        self.thread_ref.set_current_ptr_list(self.saved);
    }
}

/// Undoes a fresh block's linkage, `alloc_size` contribution, and raw memory unless `armed` is
/// cleared after every allocation step — including `init` — completes without panicking or
/// failing. Rolls back on an `init` panic exactly as it would on an explicit constructor error.
struct BlockGuard {
    header_ptr: NonNull<BlockHeader>,
    raw: NonNull<u8>,
    layout: Layout,
    size: u64,
    global: &'static GlobalState,
    armed: bool,
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            tracing::warn!("constructor panicked, rolled back allocation");
        }
        List::detach(self.header_ptr);
        self.global
            .alloc_size
            .fetch_sub(self.size, Ordering::Relaxed);
        unsafe { std::ptr::drop_in_place(self.header_ptr.as_ptr()) };
        unsafe { std::alloc::dealloc(self.raw.as_ptr(), self.layout) };
    }
}

/// As [`BlockGuard`], but for an in-progress array allocation: also drops, in reverse order,
/// whichever element prefix has been constructed so far when an element's `init(i)` panics
/// partway through the loop.
struct ArrayGuard<T> {
    header_ptr: NonNull<BlockHeader>,
    raw: NonNull<u8>,
    layout: Layout,
    size: u64,
    global: &'static GlobalState,
    payload: NonNull<T>,
    constructed: usize,
    armed: bool,
}

impl<T> Drop for ArrayGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            tracing::warn!("constructor panicked, rolled back array allocation");
        }
        for i in (0..self.constructed).rev() {
            unsafe { std::ptr::drop_in_place(self.payload.as_ptr().add(i)) };
        }
        List::detach(self.header_ptr);
        self.global
            .alloc_size
            .fetch_sub(self.size, Ordering::Relaxed);
        unsafe { std::ptr::drop_in_place(self.header_ptr.as_ptr()) };
        unsafe { std::alloc::dealloc(self.raw.as_ptr(), self.layout) };
    }
}

fn allocate_one<T>(
    vtable: &'static VTable,
    init: impl FnOnce(NonNull<T>) -> core::result::Result<(), String>,
) -> Result<SmartPtr<T>> {
    let (layout, offset) = block::layout_for::<T>(1);
    let size = layout.size() as u64;

    let global = global::global();
    pre_check_auto_collect(global, size);

    let _critical_section = CriticalSection::enter();
    let thread = thread_record::current();
    let thread_ref = unsafe { thread.as_ref() };

    let raw =
        BlockHeader::allocate_raw(layout).ok_or(Error::OutOfMemory { size: layout.size() })?;
    let header_ptr: NonNull<BlockHeader> = raw.cast();
    unsafe { BlockHeader::init(header_ptr, thread, vtable, layout, offset) };
    thread_ref.blocks.append(header_ptr);

    global.alloc_size.fetch_add(size, Ordering::Relaxed);
    global.record_allocation(size);

    let mut guard = BlockGuard {
        header_ptr,
        raw,
        layout,
        size,
        global,
        armed: true,
    };

    let block_ptr_list = NonNull::from(&unsafe { header_ptr.as_ref() }.ptr_list);
    let _cursor = CursorGuard::enter(thread_ref, block_ptr_list);

    let payload: NonNull<T> = unsafe { header_ptr.as_ref() }.payload().cast();
    let result = init(payload);

    match result {
        Ok(()) => {
            guard.armed = false;
            Ok(SmartPtr::register_in_current(payload))
        }
        Err(message) => {
            tracing::warn!(error = %message, "constructor failed, rolled back allocation");
            drop(guard);
            Err(Error::ConstructorFailed(message))
        }
    }
}

fn allocate_array<T>(
    count: usize,
    vtable: &'static VTable,
    mut init: impl FnMut(usize) -> T,
) -> Result<SmartPtr<T>> {
    let (layout, offset) = block::layout_for::<T>(count);
    let size = layout.size() as u64;

    let global = global::global();
    pre_check_auto_collect(global, size);

    let _critical_section = CriticalSection::enter();
    let thread = thread_record::current();
    let thread_ref = unsafe { thread.as_ref() };

    let raw =
        BlockHeader::allocate_raw(layout).ok_or(Error::OutOfMemory { size: layout.size() })?;
    let header_ptr: NonNull<BlockHeader> = raw.cast();
    unsafe { BlockHeader::init(header_ptr, thread, vtable, layout, offset) };
    thread_ref.blocks.append(header_ptr);

    global.alloc_size.fetch_add(size, Ordering::Relaxed);
    global.record_allocation(size);

    let payload: NonNull<T> = unsafe { header_ptr.as_ref() }.payload().cast();
    let mut guard = ArrayGuard {
        header_ptr,
        raw,
        layout,
        size,
        global,
        payload,
        constructed: 0,
        armed: true,
    };

    let block_ptr_list = NonNull::from(&unsafe { header_ptr.as_ref() }.ptr_list);
    let _cursor = CursorGuard::enter(thread_ref, block_ptr_list);

    for i in 0..count {
        let element = unsafe { NonNull::new_unchecked(payload.as_ptr().add(i)) };
        unsafe { element.as_ptr().write(init(i)) };
        guard.constructed = i + 1;
    }

    guard.armed = false;
    Ok(SmartPtr::register_in_current(payload))
}

fn pre_check_auto_collect(global: &'static global::GlobalState, size: u64) {
    let projected = global.alloc_size.load(Ordering::Relaxed) + size;
    if global.should_auto_collect(projected) {
        tracing::debug!(projected, "alloc pre-check triggered async collection");
        global.request_async_collection();
    }
}

/// Allocates one `T`, constructed in place by `init`. `init` must not itself call
/// `alloc`/`try_alloc`/`alloc_array` on this thread (that would self-deadlock on this thread's
/// coordination mutex); it may construct [`SmartPtr`] fields by cloning pointers to
/// already-existing objects.
pub fn alloc<T: 'static>(init: impl FnOnce() -> T) -> Result<SmartPtr<T>> {
    allocate_one(vtable_for::<T>(), move |ptr| {
        unsafe { ptr.as_ptr().write(init()) };
        Ok(())
    })
}

/// As [`alloc`], but for a `T` that additionally opts into [`crate::finalize::Finalize`].
pub fn alloc_finalized<T: crate::finalize::Finalize + 'static>(
    init: impl FnOnce() -> T,
) -> Result<SmartPtr<T>> {
    allocate_one(vtable_for_finalized::<T>(), move |ptr| {
        unsafe { ptr.as_ptr().write(init()) };
        Ok(())
    })
}

/// Allocates one `T` via a fallible constructor. On `Err`, every side effect of the allocation
/// is rolled back and [`Error::ConstructorFailed`] is returned; the original error's `Display`
/// output becomes the message.
pub fn try_alloc<T: 'static, E: std::fmt::Display>(
    init: impl FnOnce() -> core::result::Result<T, E>,
) -> Result<SmartPtr<T>> {
    allocate_one(vtable_for::<T>(), move |ptr| match init() {
        Ok(value) => {
            unsafe { ptr.as_ptr().write(value) };
            Ok(())
        }
        Err(error) => Err(error.to_string()),
    })
}

/// Allocates `count` contiguous `T`s, each constructed by `init(index)`. Finalized in reverse
/// element order during sweep.
pub fn alloc_array<T: 'static>(
    count: usize,
    init: impl FnMut(usize) -> T,
) -> Result<SmartPtr<T>> {
    allocate_array(count, vtable_for_array::<T>(), init)
}

/// As [`alloc_array`], but for a `T` that additionally opts into [`crate::finalize::Finalize`].
pub fn alloc_array_finalized<T: crate::finalize::Finalize + 'static>(
    count: usize,
    init: impl FnMut(usize) -> T,
) -> Result<SmartPtr<T>> {
    allocate_array(count, vtable_for_array_finalized::<T>(), init)
}
