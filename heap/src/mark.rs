//! Precise marking.
//!
//! Iterative: all pointer slots of an object but the last go on a work
//! list, the last becomes the current value and the loop continues. Long
//! cdr-chains therefore cost no stack at all and the work list only grows
//! with the breadth of the graph.

use object::{Value, tags};

use crate::{Context, HeapInner, slab::report_bad_tag};

const WORD: usize = size_of::<u64>();

pub(crate) struct Marker<'h> {
    heap: &'h HeapInner,
    stack: Vec<Value>,
}

impl<'h> Marker<'h> {
    pub fn new(heap: &'h HeapInner) -> Self {
        Self {
            heap,
            stack: Vec::new(),
        }
    }

    /// Marks everything reachable from `root`. Values that are not
    /// references, and objects already marked, end the walk at once.
    pub fn mark(&mut self, root: Value) {
        self.stack.push(root);
        while let Some(value) = self.stack.pop() {
            self.mark_chain(value);
        }
    }

    fn mark_chain(&mut self, mut value: Value) {
        loop {
            let Some(obj) = self.heap.resolve(value) else {
                return;
            };
            if obj.header().mark() {
                return;
            }
            if obj.tag() == tags::CONTEXT {
                // SAFETY: tag checked above.
                let ctx = unsafe { Context::from_object_unchecked(obj) };
                self.push_saves(ctx);
            }

            let Some(info) = self.heap.types.get(obj.tag()) else {
                report_bad_tag(obj);
                return;
            };
            let count = info.pointer_slot_count(obj);
            if count == 0 {
                return;
            }
            let base = info.pointer_slot_base_offset();
            for i in 0..count - 1 {
                self.stack.push(obj.value_at(base + i * WORD));
            }
            value = obj.value_at(base + (count - 1) * WORD);
        }
    }

    fn push_saves(&mut self, ctx: Context) {
        for frame in ctx.save_frames() {
            self.stack.extend_from_slice(frame.values());
            self.stack.extend_from_slice(frame.overflow());
        }
    }
}
