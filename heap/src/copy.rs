//! Whole-heap duplication for forking a session.
//!
//! The source must be a single slab. Its bytes are copied wholesale, then the
//! source's live objects are walked (free regions skipped via the source free
//! list) and every slot of the copy that points into the source slab is
//! shifted by the distance between the two slabs. Not available with a
//! global heap.

use std::{iter, ptr};

use bitflags::bitflags;
use log::{debug, trace};
use object::{HeaderFlags, ObjectRef, Value, tags};

use crate::{
    Context, Heap, HeapError, HeapInner,
    slab::{FreeNode, Slab},
};

const WORD: usize = size_of::<u64>();

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CopyFlags: u8 {
        /// The copy keeps `OWNED` markers and finalizes its objects itself.
        /// Without it the copy is a view and never runs finalizers.
        const KEEP_OWNERSHIP = 1 << 0;
    }
}

impl HeapInner {
    fn single_slab(&self) -> Result<&Slab, HeapError> {
        match self.slabs.as_slice() {
            [slab] => Ok(slab),
            _ => Err(HeapError::NonContiguousHeap),
        }
    }

    fn check_source(&self, ctx: Context) -> Result<(), HeapError> {
        if self.contains(ctx.object().addr()) && ctx.is_in(self) {
            Ok(())
        } else {
            Err(HeapError::NotAContext)
        }
    }

    /// Duplicates this heap into a fresh one of the same size. Returns the
    /// new heap and the copy of `ctx`.
    pub fn fork(&self, ctx: Context, flags: CopyFlags) -> Result<(Heap, Context), HeapError> {
        let from = self.single_slab()?;
        self.check_source(ctx)?;
        let slab = Slab::create(from.size(), from.max_size())
            .ok_or(HeapError::Reservation { size: from.size() })?;
        let heap = Heap::from_slab(self.settings.clone(), self.types.clone(), slab);
        let copy = self.copy_slab(ctx, &heap, flags);
        Ok((heap, copy))
    }

    /// Duplicates this heap over the heap of `dst_ctx`, which must be a
    /// single slab at least as large as this one. Everything previously in
    /// `dst` is overwritten, `dst_ctx` included, and its global and scratch
    /// roots are dropped. Returns the copy of `ctx`.
    pub fn copy_into(
        &self,
        ctx: Context,
        dst: &mut Heap,
        dst_ctx: Value,
        flags: CopyFlags,
    ) -> Result<Context, HeapError> {
        self.check_destination(ctx, dst, dst_ctx)?;
        if dst.clear_global_roots().is_some() {
            debug!("dropped global roots of overwritten heap 0x{:x}", dst.addr());
        }
        dst.scratch.clear();
        Ok(self.copy_slab(ctx, dst, flags))
    }

    fn check_destination(&self, ctx: Context, dst: &HeapInner, dst_ctx: Value) -> Result<(), HeapError> {
        let from = self.single_slab()?;
        self.check_source(ctx)?;
        if dst_ctx.addr().is_some_and(|addr| self.contains(addr)) {
            return Err(HeapError::SameHeap);
        }
        match Context::from_value(dst, dst_ctx) {
            Some(target) if target.is_in(dst) => {}
            _ => return Err(HeapError::NotAContext),
        }
        let to = dst.single_slab()?;
        if to.size() < from.size() {
            return Err(HeapError::DestinationTooSmall {
                required: from.size(),
                available: to.size(),
            });
        }
        Ok(())
    }

    fn copy_slab(&self, ctx: Context, dst: &HeapInner, flags: CopyFlags) -> Context {
        let from = &self.slabs[0];
        let to = &dst.slabs[0];
        let (src_base, dst_base) = (from.start(), to.start());
        let relocate = |addr: usize| addr - src_base + dst_base;
        debug!(
            "copying heap 0x{:x} ({} bytes) to 0x{:x} ({} bytes)",
            src_base,
            from.size(),
            dst_base,
            to.size()
        );

        // SAFETY: both slabs are mapped for at least `from.size()` bytes and
        // distinct mappings never overlap.
        unsafe {
            ptr::copy_nonoverlapping(src_base as *const u8, dst_base as *mut u8, from.size());

            let mut q = to.head();
            while !(*q).next.is_null() {
                (*q).next = relocate((*q).next as usize) as *mut FreeNode;
                q = (*q).next;
            }

            // Hand the destination's extra room to the free list.
            if from.size() < to.size() {
                let extra = to.size() - from.size();
                let copied_end = dst_base + from.size();
                if q as usize + (*q).size >= copied_end {
                    (*q).size += extra;
                } else {
                    let tail = copied_end as *mut FreeNode;
                    tail.write(FreeNode {
                        size: extra,
                        next: ptr::null_mut(),
                    });
                    (*q).next = tail;
                }
            }
        }

        let shift = |copy: ObjectRef, base: usize, count: usize| {
            for i in 0..count {
                let offset = base + i * WORD;
                if let Some(addr) = copy.value_at(offset).addr().filter(|&a| from.contains(a)) {
                    copy.set_value_at(offset, Value::from_addr(relocate(addr)));
                }
            }
        };

        for obj in from.live_objects(&self.types) {
            // SAFETY: the copy of a live block sits at the same offset in `to`.
            let copy = unsafe { ObjectRef::from_addr(relocate(obj.addr())) };
            if let Some(info) = self.types.get(obj.tag()) {
                let strong = (info.pointer_slot_base_offset(), info.pointer_slot_count(obj));
                let weak = info.weak_slot_base_offset().map(|base| {
                    (base, info.weak_slot_count(obj) + info.ephemeron_extra_slot_count())
                });
                for (base, count) in iter::once(strong).chain(weak) {
                    shift(copy, base, count);
                }
            }
            if !flags.contains(CopyFlags::KEEP_OWNERSHIP) {
                copy.header().remove_flag(HeaderFlags::OWNED);
            }
            if copy.tag() == tags::CONTEXT {
                // SAFETY: tag checked above.
                let copied = unsafe { Context::from_object_unchecked(copy) };
                copied.set_saves(ptr::null());
                if copied.heap_addr() == self.addr() {
                    copied.set_heap_addr(dst.addr());
                }
            }
            trace!("copied 0x{:x} -> 0x{:x}", obj.addr(), copy.addr());
        }

        // SAFETY: ctx is a live context of the source, copied like the rest.
        unsafe { Context::from_object_unchecked(ObjectRef::from_addr(relocate(ctx.object().addr()))) }
    }
}
