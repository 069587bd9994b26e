//! Mark-and-sweep heap over a chain of free-list slabs.
//!
//! Objects never move during ordinary collection. A collection cycle marks
//! from the given context, the global root provider and internal scratch
//! roots, optionally scans a native stack snapshot, breaks dead weak
//! references and finally sweeps every slab.
//!
//! This crate is decoupled from any interpreter. Consumers provide:
//! - A [`TypeTable`] describing the shape of every object tag.
//! - A [`RootProvider`] for roots that live outside contexts (e.g. symbols).

use std::{
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use log::{debug, warn};
use object::{Header, ObjectRef, TypeInfo, TypeTable, Value};

use crate::{
    Context, HeapError, HeapSettings,
    growth,
    mark::Marker,
    slab::{HEAP_ALIGN, MIN_OBJECT_SIZE, Slab, align_up},
    sweep::SweepStats,
};

#[cfg(feature = "conservative")]
use crate::conservative::{StackBase, StackSnapshot};

// ── Public API types ──────────────────────────────────────────────────

/// Consumers implement this to provide global roots.
///
/// Called once per collection. Objects never move, so the visitor only
/// reads the values, but it receives `&mut Value` to match the other
/// root walkers. Providers travel with their heap across threads.
pub trait RootProvider: Send {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

/// Cumulative counters over the heap's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub bytes_freed: usize,
    pub growths: usize,
    pub out_of_memory: usize,
}

// ── HeapInner ─────────────────────────────────────────────────────────

pub struct HeapInner {
    pub(crate) settings: HeapSettings,
    pub(crate) types: TypeTable,
    /// The slab chain in growth order. Never empty.
    pub(crate) slabs: Vec<Slab>,
    globals: Option<Box<dyn RootProvider>>,
    /// Values kept alive across an allocation by the typed helpers.
    pub(crate) scratch: Vec<Value>,
    pub(crate) stats: GcStats,
    #[cfg(feature = "conservative")]
    pub(crate) stack_base: Option<StackBase>,
}

impl HeapInner {
    fn new(settings: HeapSettings, types: TypeTable, slab: Slab) -> Self {
        Self {
            settings,
            types,
            slabs: vec![slab],
            globals: None,
            scratch: Vec::new(),
            stats: GcStats::default(),
            #[cfg(feature = "conservative")]
            stack_base: None,
        }
    }

    /// Identity stored in the heap word of this heap's contexts.
    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self as *const Self as usize
    }

    #[inline]
    pub fn settings(&self) -> &HeapSettings {
        &self.settings
    }

    #[inline]
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// Adds a type descriptor; see [`TypeTable::register`].
    pub fn register_type(&mut self, info: TypeInfo) -> Option<u8> {
        self.types.register(info)
    }

    #[inline]
    pub fn stats(&self) -> GcStats {
        self.stats
    }

    pub fn set_global_roots(&mut self, roots: Box<dyn RootProvider>) {
        self.globals = Some(roots);
    }

    pub fn clear_global_roots(&mut self) -> Option<Box<dyn RootProvider>> {
        self.globals.take()
    }

    // ── Slabs ─────────────────────────────────────────────────────────

    #[inline]
    pub fn slabs(&self) -> &[Slab] {
        &self.slabs
    }

    #[inline]
    pub fn last_slab(&self) -> &Slab {
        &self.slabs[self.slabs.len() - 1]
    }

    pub fn total_size(&self) -> usize {
        self.slabs.iter().map(Slab::size).sum()
    }

    pub fn free_bytes(&self) -> usize {
        self.slabs.iter().map(Slab::free_bytes).sum()
    }

    /// Heap membership: `addr` falls inside the object area of some slab.
    /// Says nothing about whether a live object starts there.
    pub fn contains(&self, addr: usize) -> bool {
        self.slabs.iter().any(|s| s.contains(addr))
    }

    /// Appends a slab big enough for `min_size`: twice the larger of the
    /// last slab and the request, clamped to the configured maximum.
    pub fn append_slab(&mut self, min_size: usize) -> bool {
        let total = self.total_size();
        let max = self.settings.max_size;
        let Some(size) = growth::next_slab_size(self.last_slab().size(), min_size, total, max)
        else {
            warn!("heap growth refused: {total} of {max} bytes in use, need {min_size}");
            return false;
        };
        match Slab::create(size, max) {
            Some(slab) => {
                debug!("heap grown by {size} bytes to {}", total + size);
                self.slabs.push(slab);
                self.stats.growths += 1;
                true
            }
            None => {
                warn!("failed to reserve a {size} byte slab");
                false
            }
        }
    }

    // ── Object lookup ─────────────────────────────────────────────────

    /// Checked lookup: an aligned reference into one of this heap's slabs
    /// whose header carries a registered tag.
    pub fn object(&self, value: Value) -> Option<ObjectRef> {
        let addr = value.addr()?;
        if addr % HEAP_ALIGN != 0 || !self.contains(addr) {
            return None;
        }
        // SAFETY: addr is aligned and inside a mapped slab.
        let obj = unsafe { ObjectRef::from_addr(addr) };
        self.types.is_valid_tag(obj.tag()).then_some(obj)
    }

    /// Lookup used by the collector on values reached from roots.
    #[cfg(not(feature = "safe-gc"))]
    #[inline(always)]
    pub(crate) fn resolve(&self, value: Value) -> Option<ObjectRef> {
        // SAFETY: reference values reachable from roots denote live objects.
        unsafe { ObjectRef::from_value(value) }
    }

    #[cfg(feature = "safe-gc")]
    pub(crate) fn resolve(&self, value: Value) -> Option<ObjectRef> {
        use log::error;

        let addr = value.addr()?;
        if addr % HEAP_ALIGN != 0 {
            error!("invalid heap alignment: 0x{addr:x}");
            return None;
        }
        if !self.contains(addr) {
            error!("invalid object outside heap: 0x{addr:x}");
            return None;
        }
        // SAFETY: addr is aligned and inside a mapped slab.
        let obj = unsafe { ObjectRef::from_addr(addr) };
        if !obj.header().has_valid_magic() {
            error!("bad magic at 0x{addr:x}: 0x{:04x}", obj.header().magic());
            return None;
        }
        Some(obj)
    }

    // ── Allocation ────────────────────────────────────────────────────

    fn try_alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.slabs.iter_mut().find_map(|slab| slab.try_alloc(size))
    }

    /// Allocation driver: try, collect, maybe grow once, retry once.
    pub(crate) fn allocate_block(
        &mut self,
        ctx: Option<Context>,
        size: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        let Some(size) = align_up(size.max(MIN_OBJECT_SIZE), HEAP_ALIGN) else {
            self.stats.out_of_memory += 1;
            warn!("out of memory: {size} bytes requested");
            return Err(HeapError::OutOfMemory { requested: size });
        };
        if let Some(block) = self.try_alloc(size) {
            return Ok(block);
        }

        let swept = self.collect_from(ctx);
        let total = self.total_size();
        let live = total - self.free_bytes();
        if growth::wants_growth(&self.settings, swept, live, total, size) {
            let max = self.settings.max_size;
            if max != 0 && total >= max {
                warn!("heap growth refused: at maximum of {max} bytes");
            } else {
                self.append_slab(size);
            }
        }

        self.try_alloc(size).ok_or_else(|| {
            self.stats.out_of_memory += 1;
            warn!("out of memory: {size} bytes requested, heap is {} bytes", self.total_size());
            HeapError::OutOfMemory { requested: size }
        })
    }

    /// Allocates `size` zeroed bytes, collecting from `ctx` if needed.
    ///
    /// The block has no header until the caller writes one. Heap walks step
    /// over it in `MIN_OBJECT_SIZE` strides, so it is never reclaimed while
    /// headerless.
    pub fn allocate(&mut self, ctx: Context, size: usize) -> Result<Value, HeapError> {
        let block = self.allocate_block(Some(ctx), size)?;
        Ok(Value::from_ptr(block.as_ptr()))
    }

    /// Allocates `size` bytes and writes a header with `tag`.
    pub fn allocate_object(
        &mut self,
        ctx: Context,
        tag: u8,
        size: usize,
    ) -> Result<ObjectRef, HeapError> {
        self.allocate_tagged(Some(ctx), tag, size)
    }

    pub(crate) fn allocate_tagged(
        &mut self,
        ctx: Option<Context>,
        tag: u8,
        size: usize,
    ) -> Result<ObjectRef, HeapError> {
        debug_assert!(self.types.is_valid_tag(tag), "unregistered tag {tag}");
        let block = self.allocate_block(ctx, size)?;
        // SAFETY: the block is fresh, aligned and at least one header long.
        unsafe {
            block.cast::<Header>().write(Header::new(tag));
            Ok(ObjectRef::from_addr(block.as_ptr() as usize))
        }
    }

    // ── Collection ────────────────────────────────────────────────────

    /// Full collection rooted at `ctx`. Returns the largest coalesced free
    /// block produced and the total bytes reclaimed.
    pub fn collect(&mut self, ctx: Context) -> SweepStats {
        self.collect_from(Some(ctx))
    }

    pub(crate) fn collect_from(&mut self, ctx: Option<Context>) -> SweepStats {
        self.mark_roots(ctx);
        #[cfg(feature = "conservative")]
        if let Some(base) = self.stack_base {
            // SAFETY: the base was recorded by a frame enclosing this call.
            let snapshot = unsafe { StackSnapshot::capture(base) };
            self.conservative_mark(&snapshot);
        }
        self.finish_collection(ctx)
    }

    pub(crate) fn mark_roots(&mut self, ctx: Option<Context>) {
        let mut roots = self.scratch.clone();
        if let Some(globals) = self.globals.as_mut() {
            globals.visit_roots(&mut |v| roots.push(*v));
        }
        roots.extend(ctx.map(Context::as_value));

        let mut marker = Marker::new(self);
        for root in roots {
            marker.mark(root);
        }
    }

    pub(crate) fn finish_collection(&mut self, ctx: Option<Context>) -> SweepStats {
        debug!(
            "gc {:?} (heap: 0x{:x} size: {})",
            ctx.map(Context::as_value),
            self.addr(),
            self.total_size()
        );
        #[cfg(feature = "weak-refs")]
        self.reset_weak_references();
        let swept = self.sweep();
        debug!(
            "gc {:?} (freed: {} max_freed: {})",
            ctx.map(Context::as_value),
            swept.sum_freed,
            swept.max_freed
        );
        self.stats.collections += 1;
        self.stats.bytes_freed += swept.sum_freed;
        swept
    }
}

impl core::fmt::Debug for HeapInner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapInner")
            .field("settings", &self.settings)
            .field("slabs", &self.slabs)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

// ── Heap (Box wrapper) ────────────────────────────────────────────────

/// Owner of a [`HeapInner`]. The inner heap is boxed so that its address,
/// which contexts record, survives moves of the handle.
#[derive(Debug)]
pub struct Heap {
    inner: Box<HeapInner>,
}

impl Heap {
    pub fn new(settings: HeapSettings, types: TypeTable) -> Result<Self, HeapError> {
        settings.validate().map_err(HeapError::InvalidSettings)?;
        let mut size = align_up(settings.initial_size, HEAP_ALIGN)
            .ok_or(HeapError::InvalidSettings("initial_size too large"))?;
        if settings.max_size != 0 {
            size = size.min(settings.max_size & !(HEAP_ALIGN - 1));
        }
        let slab = Slab::create(size, settings.max_size)
            .ok_or(HeapError::Reservation { size })?;
        Ok(Self::from_slab(settings, types, slab))
    }

    pub(crate) fn from_slab(settings: HeapSettings, types: TypeTable, slab: Slab) -> Self {
        Self {
            inner: Box::new(HeapInner::new(settings, types, slab)),
        }
    }
}

impl Deref for Heap {
    type Target = HeapInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Heap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
