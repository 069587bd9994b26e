//! Slabs: contiguous mapped regions carrying an address-ordered free list.
//!
//! ```text
//! data ─► [sentinel: size 0 | next] [object] [free: size | next] [object] ... end
//! ```
//!
//! The sentinel occupies the first aligned slot of every slab so that list
//! surgery never needs a null predecessor. Free nodes overlay the memory they
//! describe.

use std::ptr::{self, NonNull};

use log::error;
use object::{ObjectRef, TypeTable};

use crate::system::{OS_PAGE_SIZE, map_memory, unmap_memory};

pub const HEAP_ALIGN: usize = 16;
/// Every block, free or allocated, is at least this large, so a split never
/// leaves a fragment too small to hold a free node.
pub const MIN_OBJECT_SIZE: usize = HEAP_ALIGN;
pub const MIN_SLAB_SIZE: usize = 4 * MIN_OBJECT_SIZE;

const _: () = assert!(size_of::<FreeNode>() <= MIN_OBJECT_SIZE);

/// Rounds `n` up to a multiple of `align` (a power of two). `None` when
/// the result does not fit in a `usize`.
#[inline(always)]
pub const fn align_up(n: usize, align: usize) -> Option<usize> {
    match n.checked_add(align - 1) {
        Some(n) => Some(n & !(align - 1)),
        None => None,
    }
}

#[repr(C)]
pub(crate) struct FreeNode {
    pub size: usize,
    pub next: *mut FreeNode,
}

/// Aligned storage size of `obj`, or `None` when its tag is unknown.
pub(crate) fn allocated_size(types: &TypeTable, obj: ObjectRef) -> Option<usize> {
    let info = types.get(obj.tag())?;
    align_up(info.byte_size(obj).max(1), HEAP_ALIGN)
}

/// Walks step over such a block one `MIN_OBJECT_SIZE` at a time.
pub(crate) fn report_bad_tag(obj: ObjectRef) {
    error!("bad object at 0x{:x}: tag {}", obj.addr(), obj.tag());
}

/// Header integrity and size checks on a block found during a heap walk.
#[cfg(feature = "safe-gc")]
pub(crate) fn check_block(obj: ObjectRef, size: usize, next_free: *const FreeNode) {
    if !obj.header().has_valid_magic() {
        error!(
            "bad magic at 0x{:x}: 0x{:04x}",
            obj.addr(),
            obj.header().magic()
        );
    }
    if !next_free.is_null() && obj.addr() + size > next_free as usize {
        error!(
            "bad size at 0x{:x} + {} > 0x{:x}",
            obj.addr(),
            size,
            next_free as usize
        );
    }
}

pub struct Slab {
    size: usize,
    max_size: usize,
    data: NonNull<u8>,
    mapped: usize,
}

// SAFETY: a slab exclusively owns its mapping; nothing else frees or
// aliases it outside of `&mut` access through the owning heap.
unsafe impl Send for Slab {}

impl Slab {
    /// Maps a new slab of at least `size` bytes and lays down its sentinel
    /// and one free node spanning the rest. `None` if the reservation fails.
    pub fn create(size: usize, max_size: usize) -> Option<Slab> {
        let size = align_up(size.max(MIN_SLAB_SIZE), HEAP_ALIGN)?;
        let mapped = align_up(size, OS_PAGE_SIZE)?;
        let data = map_memory(mapped)?;
        let slab = Slab {
            size,
            max_size,
            data,
            mapped,
        };
        // SAFETY: both nodes lie inside the fresh mapping.
        unsafe {
            let first = data.as_ptr().add(MIN_OBJECT_SIZE).cast::<FreeNode>();
            first.write(FreeNode {
                size: size - MIN_OBJECT_SIZE,
                next: ptr::null_mut(),
            });
            slab.head().write(FreeNode { size: 0, next: first });
        }
        Some(slab)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.data.as_ptr() as usize
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start() + self.size
    }

    /// True when `addr` lies in the object area (past the sentinel).
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start() + MIN_OBJECT_SIZE && addr < self.end()
    }

    #[inline]
    pub(crate) fn head(&self) -> *mut FreeNode {
        self.data.as_ptr().cast()
    }

    /// `(address, size)` of every free block, sentinel excluded.
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        // SAFETY: the head is always a valid node.
        let first = unsafe { (*self.head()).next };
        FreeBlocks {
            node: first,
            _slab: self,
        }
    }

    pub fn free_bytes(&self) -> usize {
        self.free_blocks().map(|(_, size)| size).sum()
    }

    pub fn largest_free_block(&self) -> usize {
        self.free_blocks().map(|(_, size)| size).max().unwrap_or(0)
    }

    /// First fit. `size` must already be aligned. The block is zeroed.
    pub(crate) fn try_alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        debug_assert!(size >= MIN_OBJECT_SIZE && size % HEAP_ALIGN == 0);
        let mut prev = self.head();
        // SAFETY: every node reachable from the head lies inside this slab.
        unsafe {
            let mut node = (*prev).next;
            while !node.is_null() {
                if (*node).size >= size {
                    if (*node).size >= size + MIN_OBJECT_SIZE {
                        let tail = node.cast::<u8>().add(size).cast::<FreeNode>();
                        tail.write(FreeNode {
                            size: (*node).size - size,
                            next: (*node).next,
                        });
                        (*prev).next = tail;
                    } else {
                        (*prev).next = (*node).next;
                    }
                    let block = node.cast::<u8>();
                    block.write_bytes(0, size);
                    return NonNull::new(block);
                }
                prev = node;
                node = (*node).next;
            }
        }
        None
    }

    /// Allocated blocks in address order, free regions skipped.
    pub(crate) fn live_objects<'a>(&'a self, types: &'a TypeTable) -> LiveObjects<'a> {
        LiveObjects {
            types,
            // SAFETY: the head is always a valid node.
            free: unsafe { (*self.head()).next },
            cursor: self.start() + MIN_OBJECT_SIZE,
            end: self.end(),
        }
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        unmap_memory(self.data, self.mapped);
    }
}

impl core::fmt::Debug for Slab {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Slab")
            .field("start", &format_args!("0x{:x}", self.start()))
            .field("size", &self.size)
            .field("max_size", &self.max_size)
            .finish()
    }
}

pub struct FreeBlocks<'a> {
    node: *const FreeNode,
    _slab: &'a Slab,
}

impl Iterator for FreeBlocks<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.node.is_null() {
            return None;
        }
        // SAFETY: nodes reachable from the head lie inside the borrowed slab.
        let node = unsafe { &*self.node };
        let item = (self.node as usize, node.size);
        self.node = node.next;
        Some(item)
    }
}

/// Walks a slab's allocated blocks, using the free list as a parallel cursor.
pub(crate) struct LiveObjects<'a> {
    types: &'a TypeTable,
    free: *const FreeNode,
    cursor: usize,
    end: usize,
}

impl Iterator for LiveObjects<'_> {
    type Item = ObjectRef;

    fn next(&mut self) -> Option<ObjectRef> {
        while self.cursor < self.end {
            // SAFETY: free nodes and blocks between them lie inside the slab.
            unsafe {
                while !self.free.is_null() && (self.free as usize) < self.cursor {
                    self.free = (*self.free).next;
                }
                if self.free as usize == self.cursor {
                    self.cursor += (*self.free).size;
                    continue;
                }
                let obj = ObjectRef::from_addr(self.cursor);
                let Some(size) = allocated_size(self.types, obj) else {
                    report_bad_tag(obj);
                    self.cursor += MIN_OBJECT_SIZE;
                    continue;
                };
                #[cfg(feature = "safe-gc")]
                check_block(obj, size, self.free);
                self.cursor += size;
                return Some(obj);
            }
        }
        None
    }
}
