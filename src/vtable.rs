//! Per-`(type, is_array)` virtual dispatch table.
//!
//! Every block stores a `&'static VTable` selected for its payload type at allocation time. The
//! table is intentionally thin: `scan` is an empty no-op for every type this crate builds,
//! because precise tracing happens automatically through the smart pointer's ptr-list
//! registration discipline — there are no untraced pointers for `scan` to discover. It is kept so
//! that the `external_owner` extension point has somewhere to live, and for parity with the
//! collaborator vtable contract this design is modeled on.

use std::alloc::Layout;
use std::marker::PhantomData;

/// Operations needed to scan, finalize, and free a block's payload, without the caller needing
/// to know its concrete type.
pub(crate) struct VTable {
    /// Scans `[begin, end)` for embedded smart pointers not already tracked via a ptr list.
    /// Always a no-op in this implementation — see the module docs.
    pub(crate) scan: fn(begin: *mut (), end: *mut ()),
    /// Runs the payload's destructor(s). For arrays, runs in reverse element order.
    ///
    /// # Safety
    /// `[begin, end)` must be a single live, fully-initialized payload of the vtable's type.
    pub(crate) finalize: unsafe fn(begin: *mut (), end: *mut ()),
    /// Releases the raw memory backing a block (header + payload), given the layout that was
    /// used to allocate it.
    ///
    /// # Safety
    /// `block` must be a pointer previously produced by the allocator with exactly `layout`,
    /// not already freed.
    pub(crate) free: unsafe fn(block: *mut (), layout: Layout),
    /// Optional `shared_from_this`-style interop hook: reports whether `[begin, end)` is kept
    /// alive by an external owner outside the collector's own root set. Defaults to `false`;
    /// not exercised by any built-in type.
    pub(crate) external_owner: fn(begin: *mut (), end: *mut ()) -> bool,
}

fn scan_noop(_begin: *mut (), _end: *mut ()) {}

fn external_owner_noop(_begin: *mut (), _end: *mut ()) -> bool {
    false
}

/// Runs `f`, catching and logging a panic rather than letting it unwind into the collector or
/// into `delete`'s caller — a panicking finalizer or destructor must not abort the sweep of the
/// remaining unreachable blocks.
fn guard_unwind(what: &str, f: impl FnOnce() + std::panic::UnwindSafe) {
    if std::panic::catch_unwind(f).is_err() {
        tracing::error!(what, "panic caught during block finalization");
    }
}

unsafe fn finalize_one<T>(begin: *mut (), _end: *mut ()) {
    guard_unwind("destructor", std::panic::AssertUnwindSafe(|| unsafe {
        std::ptr::drop_in_place(begin.cast::<T>());
    }));
}

unsafe fn finalize_array<T>(begin: *mut (), end: *mut ()) {
    let begin_t = begin.cast::<T>();
    let end_t = end.cast::<T>();
    let len = unsafe { end_t.offset_from(begin_t) };
    debug_assert!(len >= 0);
    for i in (0..len).rev() {
        guard_unwind("destructor", std::panic::AssertUnwindSafe(|| unsafe {
            std::ptr::drop_in_place(begin_t.offset(i));
        }));
    }
}

unsafe fn finalize_one_with_finalize<T: crate::finalize::Finalize>(begin: *mut (), end: *mut ()) {
    guard_unwind("finalize", std::panic::AssertUnwindSafe(|| unsafe {
        (*begin.cast::<T>()).finalize();
    }));
    unsafe { finalize_one::<T>(begin, end) };
}

unsafe fn finalize_array_with_finalize<T: crate::finalize::Finalize>(
    begin: *mut (),
    end: *mut (),
) {
    let begin_t = begin.cast::<T>();
    let end_t = end.cast::<T>();
    let len = unsafe { end_t.offset_from(begin_t) };
    debug_assert!(len >= 0);
    for i in (0..len).rev() {
        guard_unwind("finalize", std::panic::AssertUnwindSafe(|| unsafe {
            (*begin_t.offset(i)).finalize();
        }));
    }
    unsafe { finalize_array::<T>(begin, end) };
}

/// Drops the header in place (reclaiming its ptr-list sentinel's own heap allocation) before
/// releasing the raw header+payload memory. The header's ptr-list is expected to already be
/// logically empty of live node allocations by this point — see `collector::sweep` and
/// `delete::delete`, which null each node's fields ahead of finalize so that the payload's own
/// embedded smart pointers free their nodes as they drop, rather than this doing it twice.
unsafe fn free_raw(block: *mut (), layout: Layout) {
    guard_unwind("header drop", std::panic::AssertUnwindSafe(|| unsafe {
        std::ptr::drop_in_place(block.cast::<crate::block::BlockHeader>());
    }));
    unsafe {
        std::alloc::dealloc(block.cast::<u8>(), layout);
    }
}

/// Returns the static vtable for a single, non-array `T` payload.
pub(crate) fn vtable_for<T: 'static>() -> &'static VTable {
    struct Holder<T>(PhantomData<T>);
    impl<T: 'static> Holder<T> {
        const VTABLE: VTable = VTable {
            scan: scan_noop,
            finalize: finalize_one::<T>,
            free: free_raw,
            external_owner: external_owner_noop,
        };
    }
    &Holder::<T>::VTABLE
}

/// Returns the static vtable for an array of `T`.
pub(crate) fn vtable_for_array<T: 'static>() -> &'static VTable {
    struct Holder<T>(PhantomData<T>);
    impl<T: 'static> Holder<T> {
        const VTABLE: VTable = VTable {
            scan: scan_noop,
            finalize: finalize_array::<T>,
            free: free_raw,
            external_owner: external_owner_noop,
        };
    }
    &Holder::<T>::VTABLE
}

/// Returns the static vtable for a single `T` that opts into [`crate::finalize::Finalize`]:
/// `finalize` invokes the custom hook before running the ordinary destructor.
pub(crate) fn vtable_for_finalized<T: crate::finalize::Finalize + 'static>() -> &'static VTable {
    struct Holder<T>(PhantomData<T>);
    impl<T: crate::finalize::Finalize + 'static> Holder<T> {
        const VTABLE: VTable = VTable {
            scan: scan_noop,
            finalize: finalize_one_with_finalize::<T>,
            free: free_raw,
            external_owner: external_owner_noop,
        };
    }
    &Holder::<T>::VTABLE
}

/// Returns the static vtable for an array of `T` that opts into
/// [`crate::finalize::Finalize`].
pub(crate) fn vtable_for_array_finalized<T: crate::finalize::Finalize + 'static>()
-> &'static VTable {
    struct Holder<T>(PhantomData<T>);
    impl<T: crate::finalize::Finalize + 'static> Holder<T> {
        const VTABLE: VTable = VTable {
            scan: scan_noop,
            finalize: finalize_array_with_finalize::<T>,
            free: free_raw,
            external_owner: external_owner_noop,
        };
    }
    &Holder::<T>::VTABLE
}
