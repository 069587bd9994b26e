use object::{HeaderFlags, ObjectRef, TypeTable};

use crate::{
    HeapInner,
    slab::{FreeNode, MIN_OBJECT_SIZE, Slab, allocated_size, report_bad_tag},
};

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Largest single coalesced free run produced.
    pub max_freed: usize,
    /// Bytes of dead objects reclaimed.
    pub sum_freed: usize,
}

impl HeapInner {
    /// Reclaims every unmarked object and clears the mark on survivors.
    pub(crate) fn sweep(&mut self) -> SweepStats {
        let mut stats = SweepStats::default();
        for slab in &self.slabs {
            sweep_slab(slab, &self.types, &mut stats);
        }
        stats
    }
}

fn finalize(types: &TypeTable, obj: ObjectRef) {
    let Some(finalizer) = types.get(obj.tag()).and_then(|t| t.finalizer()) else {
        return;
    };
    if obj.header().has_flag(HeaderFlags::OWNED) {
        finalizer(obj);
    }
}

/// `q` trails as the last free node before the cursor `p`, `r` is the first
/// free node at or after it. A dead block merges into `q` when they touch
/// (never into the sentinel) and absorbs `r` when they touch.
fn sweep_slab(slab: &Slab, types: &TypeTable, stats: &mut SweepStats) {
    let head = slab.head();
    let end = slab.end();
    let mut p = slab.start() + MIN_OBJECT_SIZE;
    let mut q = head;

    // SAFETY: p, q and r stay inside the slab; free nodes and blocks tile it.
    unsafe {
        while p < end {
            let mut r = (*q).next;
            while !r.is_null() && (r as usize) < p {
                q = r;
                r = (*r).next;
            }
            if r as usize == p {
                p += (*r).size;
                continue;
            }

            let obj = ObjectRef::from_addr(p);
            let Some(size) = allocated_size(types, obj) else {
                report_bad_tag(obj);
                p += MIN_OBJECT_SIZE;
                continue;
            };
            #[cfg(feature = "safe-gc")]
            crate::slab::check_block(obj, size, r);

            if obj.header().is_marked() {
                obj.header().unmark();
                p += size;
                continue;
            }

            finalize(types, obj);
            stats.sum_freed += size;
            let touches_r = !r.is_null() && p + size == r as usize;
            let freed = if q != head && q as usize + (*q).size == p {
                let freed = if touches_r {
                    (*q).next = (*r).next;
                    (*q).size + size + (*r).size
                } else {
                    (*q).size + size
                };
                p = q as usize + freed;
                (*q).size = freed;
                freed
            } else {
                let s = p as *mut FreeNode;
                let node = if touches_r {
                    FreeNode {
                        size: size + (*r).size,
                        next: (*r).next,
                    }
                } else {
                    FreeNode { size, next: r }
                };
                s.write(node);
                (*q).next = s;
                p += (*s).size;
                (*s).size
            };
            stats.max_freed = stats.max_freed.max(freed);
        }
    }
}
