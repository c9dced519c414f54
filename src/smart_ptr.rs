//! The public smart pointer handle.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::ptr_node::PtrNode;
use crate::thread_record::{self, CriticalSection, OwnerGuard};

/// A garbage-collected smart pointer.
///
/// Self-registers into the current thread's ptr list on construction or clone, and detaches on
/// drop. A `SmartPtr<T>` may be null (constructed via [`SmartPtr::null`] or produced by clearing
/// an optional field); dereferencing a null pointer through [`SmartPtr::try_get`] returns
/// [`Error::NullDereference`] rather than panicking. The unchecked [`std::ops::Deref`]
/// implementation is meant only for pointers a caller knows are non-null, such as the ones
/// [`crate::alloc`] and [`crate::alloc_array`] return directly.
pub struct SmartPtr<T> {
    node: NonNull<PtrNode>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for SmartPtr<T> {}
unsafe impl<T: Send + Sync> Sync for SmartPtr<T> {}

impl<T> SmartPtr<T> {
    /// Builds a root `SmartPtr<T>` registered into the current thread's *current* ptr list
    /// (the thread's root list, unless an allocation redirected it to a block's member list).
    /// The calling thread's critical section must already be entered by the caller (the
    /// allocator holds it for the whole `alloc` call); this does not lock anything itself.
    pub(crate) fn register_in_current(value: NonNull<T>) -> SmartPtr<T> {
        let thread = thread_record::current();
        let thread_ref = unsafe { thread.as_ref() };
        let list = thread_ref.current_ptr_list();
        let mutex = NonNull::from(&thread_ref.mutex);
        let node = PtrNode::new();
        PtrNode::attach(node, unsafe { list.as_ref() }, mutex, value.as_ptr().cast());
        SmartPtr {
            node,
            _marker: PhantomData,
        }
    }

    /// A pointer holding no value.
    #[must_use]
    pub fn null() -> SmartPtr<T> {
        let _critical_section = CriticalSection::enter();
        let thread = thread_record::current();
        let thread_ref = unsafe { thread.as_ref() };
        let list = thread_ref.current_ptr_list();
        let mutex = NonNull::from(&thread_ref.mutex);
        let node = PtrNode::new();
        PtrNode::attach(node, unsafe { list.as_ref() }, mutex, std::ptr::null_mut());
        SmartPtr {
            node,
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        unsafe { self.node.as_ref() }.value().is_null()
    }

    /// The raw payload address this pointer currently holds, if any. Used by
    /// [`crate::delete`] to locate the block a pointer refers to.
    pub(crate) fn raw_value(&self) -> Option<NonNull<T>> {
        NonNull::new(unsafe { self.node.as_ref() }.value().cast())
    }

    /// Returns a reference to the pointee, or `None` if this pointer is null.
    pub fn get(&self) -> Option<&T> {
        let value = unsafe { self.node.as_ref() }.value();
        if value.is_null() {
            None
        } else {
            Some(unsafe { &*value.cast::<T>() })
        }
    }

    /// Returns a reference to the pointee, or [`Error::NullDereference`] if this pointer is
    /// null.
    pub fn try_get(&self) -> Result<&T> {
        self.get().ok_or(Error::NullDereference)
    }

    /// Overwrites this pointer's value in place, under the value's owning thread's mutex.
    pub fn set(&mut self, value: Option<NonNull<T>>) {
        let owner_mutex = unsafe { self.node.as_ref() }
            .owner_mutex()
            .expect("a live SmartPtr always has an owner mutex");
        let _guard = OwnerGuard::enter(owner_mutex);
        let raw = value.map_or(std::ptr::null_mut(), |p| p.as_ptr().cast());
        unsafe { self.node.as_ref() }.set_value(raw);
    }
}

impl<T> Clone for SmartPtr<T> {
    /// Registers a fresh node, carrying the same value, into the *current* thread's ptr list —
    /// not necessarily the thread that owns the original, since the clone's storage belongs to
    /// wherever the calling code physically constructs it.
    fn clone(&self) -> Self {
        let _critical_section = CriticalSection::enter();
        let value = unsafe { self.node.as_ref() }.value();
        let thread = thread_record::current();
        let thread_ref = unsafe { thread.as_ref() };
        let list = thread_ref.current_ptr_list();
        let mutex = NonNull::from(&thread_ref.mutex);
        let node = PtrNode::new();
        PtrNode::attach(node, unsafe { list.as_ref() }, mutex, value);
        SmartPtr {
            node,
            _marker: PhantomData,
        }
    }
}

impl<T> Drop for SmartPtr<T> {
    fn drop(&mut self) {
        let owner_mutex = unsafe { self.node.as_ref() }.owner_mutex();
        if let Some(owner_mutex) = owner_mutex {
            let _guard = OwnerGuard::enter(owner_mutex);
            crate::ptr_node::PtrNode::detach_and_clear(self.node);
        }
        unsafe { PtrNode::free(self.node) };
    }
}

impl<T> std::ops::Deref for SmartPtr<T> {
    type Target = T;

    /// # Panics
    /// Panics if this pointer is null. Use [`SmartPtr::try_get`] when null is possible.
    fn deref(&self) -> &T {
        self.get().expect("dereferenced a null SmartPtr")
    }
}

impl<T> fmt::Debug for SmartPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(_) => write!(f, "SmartPtr({:p})", unsafe { self.node.as_ref() }.value()),
            None => write!(f, "SmartPtr(null)"),
        }
    }
}
