//! Weak references and ephemerons.
//!
//! Runs between marking and sweeping. A weak slot of a marked object whose
//! referent went unmarked is overwritten with `#f` and the owner flagged
//! broken. When every weak slot of an object was broken in this pass, its
//! ephemeron value slots (stored right after the weak slots) are cleared
//! too.

use object::{HeaderFlags, ObjectRef, Value};

use crate::HeapInner;

const WORD: usize = size_of::<u64>();

impl HeapInner {
    /// Returns the number of weak slots broken.
    pub(crate) fn reset_weak_references(&self) -> usize {
        let mut broken = 0;
        for slab in &self.slabs {
            for obj in slab.live_objects(&self.types) {
                if obj.header().is_marked() {
                    broken += self.reset_object(obj);
                }
            }
        }
        broken
    }

    fn reset_object(&self, obj: ObjectRef) -> usize {
        let Some(info) = self.types.get(obj.tag()) else {
            return 0;
        };
        let Some(base) = info.weak_slot_base_offset() else {
            return 0;
        };
        let count = info.weak_slot_count(obj);
        let mut broken = 0;
        for i in 0..count {
            let offset = base + i * WORD;
            let value = obj.value_at(offset);
            // References into other heaps are left alone.
            if !value.addr().is_some_and(|addr| self.contains(addr)) {
                continue;
            }
            match self.resolve(value) {
                Some(target) if !target.header().is_marked() => {
                    obj.set_value_at(offset, Value::FALSE);
                    obj.header().add_flag(HeaderFlags::BROKEN);
                    broken += 1;
                }
                _ => {}
            }
        }
        if broken == count {
            for i in count..count + info.ephemeron_extra_slot_count() {
                obj.set_value_at(base + i * WORD, Value::FALSE);
            }
        }
        broken
    }
}
