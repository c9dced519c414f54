//! Block headers: the per-allocation metadata record that precedes every managed payload.

use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;

use crate::list::{Linked, Links, List};
use crate::ptr_node::PtrList;
use crate::thread_record::ThreadRecord;
use crate::vtable::VTable;

/// Metadata immediately preceding a managed payload in memory. `BlockHeader::payload` computes
/// the payload's address from the header's own address and the stored layout; there is no
/// pointer arithmetic a caller needs to perform by hand.
pub(crate) struct BlockHeader {
    links: Links<BlockHeader>,
    /// Smart pointers embedded within this block's payload.
    pub(crate) ptr_list: PtrList,
    /// Address one past the end of the payload.
    pub(crate) end: NonNull<u8>,
    cycle: Cell<u64>,
    pub(crate) vtable: &'static VTable,
    pub(crate) owner: NonNull<ThreadRecord>,
    layout: Layout,
    payload_offset: usize,
}

unsafe impl Linked for BlockHeader {
    fn links(&self) -> &Links<Self> {
        &self.links
    }

    unsafe fn from_links(links: NonNull<Links<Self>>) -> NonNull<Self> {
        let offset = core::mem::offset_of!(BlockHeader, links);
        unsafe { NonNull::new_unchecked(links.as_ptr().cast::<u8>().sub(offset).cast()) }
    }
}

/// Computes the total allocation layout (header + `count` elements of `T`) and the payload's
/// byte offset from the start of the header.
pub(crate) fn layout_for<T>(count: usize) -> (Layout, usize) {
    let header_layout = Layout::new::<BlockHeader>();
    let payload_layout = Layout::array::<T>(count).expect("payload layout overflow");
    let (total, offset) = header_layout
        .extend(payload_layout)
        .expect("block layout overflow");
    (total.pad_to_align(), offset)
}

impl BlockHeader {
    /// Allocates raw memory for a block sized for `count` elements of `T`, leaving the header
    /// uninitialized. Returns `None` if the allocator fails.
    pub(crate) fn allocate_raw(layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    /// Initializes a freshly allocated block's header in place.
    ///
    /// # Safety
    /// `header_ptr` must point at `layout.size()` bytes of uninitialized, suitably aligned
    /// memory obtained from the global allocator.
    pub(crate) unsafe fn init(
        header_ptr: NonNull<BlockHeader>,
        owner: NonNull<ThreadRecord>,
        vtable: &'static VTable,
        layout: Layout,
        payload_offset: usize,
    ) {
        let end = unsafe {
            NonNull::new_unchecked(header_ptr.as_ptr().cast::<u8>().add(layout.size()))
        };
        unsafe {
            header_ptr.as_ptr().write(BlockHeader {
                links: Links::new(),
                ptr_list: List::new(),
                end,
                cycle: Cell::new(0),
                vtable,
                owner,
                layout,
                payload_offset,
            });
        }
    }

    /// The payload's starting address.
    pub(crate) fn payload(&self) -> NonNull<u8> {
        let self_ptr: *const BlockHeader = self;
        unsafe {
            NonNull::new_unchecked(self_ptr.cast::<u8>().cast_mut().add(self.payload_offset))
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    pub(crate) fn layout(&self) -> Layout {
        self.layout
    }

    pub(crate) fn cycle(&self) -> u64 {
        self.cycle.get()
    }

    pub(crate) fn set_cycle(&self, cycle: u64) {
        self.cycle.set(cycle);
    }

    /// Whether `addr` lies within `[payload_start, end)`. The end address itself is excluded —
    /// a pointer exactly at a block's end belongs to whatever follows it, not to this block —
    /// except for a zero-sized payload, where `payload_start == end` and the block would
    /// otherwise never contain even its own pointer; there, `addr == payload_start` still counts.
    pub(crate) fn contains(&self, addr: usize) -> bool {
        let start = self.payload().as_ptr() as usize;
        let end = self.end.as_ptr() as usize;
        if start == end {
            addr == start
        } else {
            addr >= start && addr < end
        }
    }

    pub(crate) fn payload_start_addr(&self) -> usize {
        self.payload().as_ptr() as usize
    }
}

/// A `NonNull<BlockHeader>` usable across thread boundaries during Gather's parallel sort and
/// Sweep's parallel finalize+free. Sound because every block this wraps is only ever reachable
/// from one place at a time: exclusively by the collecting thread while the registry mutex is
/// held (Gather, Mark, Partition), or exclusively by one sweep worker once partitioned into
/// `unreachable_blocks` (Sweep) — never concurrently by two threads.
#[derive(Clone, Copy)]
pub(crate) struct BlockRef(pub(crate) NonNull<BlockHeader>);

unsafe impl Send for BlockRef {}
unsafe impl Sync for BlockRef {}

impl BlockRef {
    pub(crate) fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_offset_is_header_aligned() {
        let (layout, offset) = layout_for::<u64>(4);
        assert!(offset >= std::mem::size_of::<BlockHeader>());
        assert_eq!(offset % std::mem::align_of::<u64>(), 0);
        assert!(layout.size() >= offset + 4 * std::mem::size_of::<u64>());
    }

    #[test]
    fn contains_excludes_end_address() {
        let (layout, offset) = layout_for::<u64>(1);
        let raw = BlockHeader::allocate_raw(layout).expect("raw allocation should succeed");
        let header_ptr: NonNull<BlockHeader> = raw.cast();
        let owner = NonNull::dangling();
        let vtable = crate::vtable::vtable_for::<u64>();
        unsafe { BlockHeader::init(header_ptr, owner, vtable, layout, offset) };
        let header = unsafe { header_ptr.as_ref() };
        let start = header.payload_start_addr();
        let end = header.end.as_ptr() as usize;
        assert!(header.contains(start));
        assert!(!header.contains(end));
        assert!(header.contains(start + 1) || start + 1 == end);
        unsafe { std::alloc::dealloc(raw.as_ptr(), layout) };
    }

    #[test]
    fn contains_includes_start_for_a_zero_sized_payload() {
        let (layout, offset) = layout_for::<()>(1);
        let raw = BlockHeader::allocate_raw(layout).expect("raw allocation should succeed");
        let header_ptr: NonNull<BlockHeader> = raw.cast();
        let owner = NonNull::dangling();
        let vtable = crate::vtable::vtable_for::<()>();
        unsafe { BlockHeader::init(header_ptr, owner, vtable, layout, offset) };
        let header = unsafe { header_ptr.as_ref() };
        assert_eq!(header.payload_start_addr(), header.end.as_ptr() as usize);
        assert!(header.contains(header.payload_start_addr()));
        unsafe { std::alloc::dealloc(raw.as_ptr(), layout) };
    }
}
