//! Page-granular backing storage for slabs.
//!
//! Unix targets map anonymous memory directly so a slab never shares pages
//! with the Rust allocator; elsewhere a zeroed, page-aligned allocation
//! stands in.

use std::ptr::NonNull;

pub const OS_PAGE_SIZE: usize = 4096;

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "ios"))]
mod os {
    use core::ffi::c_void;
    use std::ptr::{self, NonNull};

    const READ_WRITE: i32 = 0x1 | 0x2;
    #[cfg(target_os = "linux")]
    const PRIVATE_ANONYMOUS: i32 = 0x02 | 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    const PRIVATE_ANONYMOUS: i32 = 0x02 | 0x1000;

    unsafe extern "C" {
        fn mmap(addr: *mut c_void, len: usize, prot: i32, flags: i32, fd: i32, off: isize) -> *mut c_void;
        fn munmap(addr: *mut c_void, len: usize) -> i32;
    }

    pub fn map(len: usize) -> Option<NonNull<u8>> {
        // SAFETY: a fresh anonymous mapping aliases nothing.
        let p = unsafe { mmap(ptr::null_mut(), len, READ_WRITE, PRIVATE_ANONYMOUS, -1, 0) };
        if p as isize == -1 {
            return None;
        }
        NonNull::new(p.cast())
    }

    /// # Safety
    /// `p` and `len` must describe a live mapping returned by [`map`].
    pub unsafe fn unmap(p: NonNull<u8>, len: usize) {
        if unsafe { munmap(p.as_ptr().cast(), len) } != 0 {
            log::warn!("munmap of 0x{:x} ({len} bytes) failed", p.as_ptr() as usize);
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
mod os {
    use std::{alloc::Layout, ptr::NonNull};

    use super::OS_PAGE_SIZE;

    fn layout(len: usize) -> Option<Layout> {
        Layout::from_size_align(len, OS_PAGE_SIZE).ok().filter(|l| l.size() > 0)
    }

    pub fn map(len: usize) -> Option<NonNull<u8>> {
        let layout = layout(len)?;
        // SAFETY: the layout has a non-zero size.
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    /// # Safety
    /// `p` and `len` must describe a live block returned by [`map`].
    pub unsafe fn unmap(p: NonNull<u8>, len: usize) {
        if let Some(layout) = layout(len) {
            unsafe { std::alloc::dealloc(p.as_ptr(), layout) };
        }
    }
}

/// Reserves `size` zeroed, page-aligned bytes.
#[must_use]
pub fn map_memory(size: usize) -> Option<NonNull<u8>> {
    os::map(size)
}

/// Returns a region obtained from [`map_memory`] with the same `size`.
pub fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: slabs hand back exactly what they mapped, once.
    unsafe { os::unmap(ptr, size) }
}
