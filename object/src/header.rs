use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

/// Written into every header at allocation. Checked by validating markers.
pub const HEADER_MAGIC: u16 = 0x5A17;

bitflags! {
    /// GC / bookkeeping flags stored atomically in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        /// Reached during the current mark phase.
        const MARKED = 1 << 0;
        /// Invalidated object; weak references to it are broken too.
        const BROKEN = 1 << 1;
        /// This heap owns the object's external resources and must run
        /// its finalizer on reclamation.
        const OWNED = 1 << 2;
    }
}

/// The 8-byte header at the start of every heap object.
///
/// ```text
/// byte 0:    type tag (0 is never a valid tag)
/// byte 1:    flags (atomic): Marked | Broken | Owned
/// bytes 2‥3: magic
/// bytes 4‥7: reserved (zero)
/// ```
#[repr(C)]
pub struct Header {
    tag: u8,
    flags: AtomicU8,
    magic: u16,
    _reserved: [u8; 4],
}

const _: () = assert!(size_of::<Header>() == 8);

impl Header {
    pub fn new(tag: u8) -> Self {
        debug_assert!(tag != 0, "tag 0 is reserved");
        Self {
            tag,
            flags: AtomicU8::new(HeaderFlags::OWNED.bits()),
            magic: HEADER_MAGIC,
            _reserved: [0; 4],
        }
    }

    #[inline(always)]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    #[inline(always)]
    pub fn magic(&self) -> u16 {
        self.magic
    }

    #[inline(always)]
    pub fn has_valid_magic(&self) -> bool {
        self.magic == HEADER_MAGIC
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn remove_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_marked(&self) -> bool {
        self.has_flag(HeaderFlags::MARKED)
    }

    /// Sets the mark bit and returns whether it was already set.
    #[inline(always)]
    pub fn mark(&self) -> bool {
        let prev = self.flags.fetch_or(HeaderFlags::MARKED.bits(), Ordering::Relaxed);
        prev & HeaderFlags::MARKED.bits() != 0
    }

    #[inline(always)]
    pub fn unmark(&self) {
        self.remove_flag(HeaderFlags::MARKED);
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("tag", &self.tag)
            .field("flags", &self.flags())
            .field("magic", &format_args!("0x{:04x}", self.magic))
            .finish()
    }
}
