use core::{marker::PhantomPinned, pin::Pin, ptr};

use object::{ObjectRef, Value, tags, types::context};

use crate::{HeapError, HeapInner};

pub const SAVE_FRAME_CAPACITY: usize = 16;

/// A context object: an execution handle that roots its own save frames.
///
/// ```text
/// +0   header
/// +8   heap      (raw address of the owning HeapInner)
/// +16  saves     (raw address of the innermost linked SaveFrame, or 0)
/// +24  parent    (context or #f)
/// +32  env
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Context(ObjectRef);

impl Context {
    /// # Safety
    /// `obj` must be a live object tagged [`tags::CONTEXT`].
    #[inline(always)]
    pub(crate) unsafe fn from_object_unchecked(obj: ObjectRef) -> Self {
        debug_assert_eq!(obj.tag(), tags::CONTEXT);
        Self(obj)
    }

    /// Checked conversion: `value` must reference a context inside `heap`.
    pub fn from_value(heap: &HeapInner, value: Value) -> Option<Self> {
        let obj = heap.object(value)?;
        (obj.tag() == tags::CONTEXT).then_some(Self(obj))
    }

    #[inline]
    pub fn object(self) -> ObjectRef {
        self.0
    }

    #[inline]
    pub fn as_value(self) -> Value {
        self.0.as_value()
    }

    pub fn parent(self) -> Option<Context> {
        let parent = self.0.value_at(context::PARENT_OFFSET);
        // SAFETY: the parent slot is only ever written with a context or #f.
        let obj = unsafe { ObjectRef::from_value(parent) }?;
        (obj.tag() == tags::CONTEXT).then_some(Self(obj))
    }

    #[inline]
    pub fn env(self) -> Value {
        self.0.value_at(context::ENV_OFFSET)
    }

    #[inline]
    pub fn set_env(self, env: Value) {
        self.0.set_value_at(context::ENV_OFFSET, env);
    }

    #[inline]
    pub(crate) fn heap_addr(self) -> usize {
        self.0.word(context::HEAP_OFFSET) as usize
    }

    #[inline]
    pub(crate) fn set_heap_addr(self, addr: usize) {
        self.0.set_word(context::HEAP_OFFSET, addr as u64);
    }

    #[inline]
    pub(crate) fn saves(self) -> *const SaveFrame {
        self.0.word(context::SAVES_OFFSET) as usize as *const SaveFrame
    }

    #[inline]
    pub(crate) fn set_saves(self, frame: *const SaveFrame) {
        self.0.set_word(context::SAVES_OFFSET, frame as usize as u64);
    }

    /// True when this context belongs to `heap`.
    pub fn is_in(self, heap: &HeapInner) -> bool {
        self.heap_addr() == heap.addr()
    }

    /// Linked save frames, innermost first.
    pub(crate) fn save_frames(&self) -> SaveFrames<'_> {
        SaveFrames {
            frame: self.saves(),
            _ctx: self,
        }
    }
}

pub(crate) struct SaveFrames<'a> {
    frame: *const SaveFrame,
    _ctx: &'a Context,
}

impl<'a> Iterator for SaveFrames<'a> {
    type Item = &'a SaveFrame;

    fn next(&mut self) -> Option<&'a SaveFrame> {
        if self.frame.is_null() {
            return None;
        }
        // SAFETY: linked frames are pinned and unlink themselves on drop.
        let frame = unsafe { &*self.frame };
        self.frame = frame.prev;
        Some(frame)
    }
}

impl HeapInner {
    /// Allocates a context of this heap. A parent, if any, roots the
    /// allocation.
    pub fn make_context(&mut self, parent: Option<Context>) -> Result<Context, HeapError> {
        let obj = self.allocate_tagged(parent, tags::CONTEXT, context::SIZE)?;
        // SAFETY: just tagged as a context.
        let ctx = unsafe { Context::from_object_unchecked(obj) };
        ctx.set_heap_addr(self.addr());
        ctx.set_saves(ptr::null());
        obj.set_value_at(
            context::PARENT_OFFSET,
            parent.map_or(Value::FALSE, Context::as_value),
        );
        ctx.set_env(Value::NULL);
        Ok(ctx)
    }
}

// ── Save frames ───────────────────────────────────────────────────────

/// Index of a value saved in a [`SaveFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saved(usize);

/// Stack-scoped set of GC roots.
///
/// The frame links itself onto its context's save list on the first
/// [`save`](Self::save) and unlinks on drop, so frames must be dropped in
/// reverse order of linking. Pin it with [`core::pin::pin!`]:
///
/// ```ignore
/// let mut frame = pin!(SaveFrame::new(ctx));
/// let list = frame.as_mut().save(list);
/// let v = heap.alloc_pair(ctx, Value::NULL, frame.get(list))?;
/// ```
pub struct SaveFrame {
    ctx: Context,
    prev: *const SaveFrame,
    linked: bool,
    len: usize,
    slots: [Value; SAVE_FRAME_CAPACITY],
    overflow: Vec<Value>,
    _pin: PhantomPinned,
}

impl SaveFrame {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            prev: ptr::null(),
            linked: false,
            len: 0,
            slots: [Value::FALSE; SAVE_FRAME_CAPACITY],
            overflow: Vec::new(),
            _pin: PhantomPinned,
        }
    }

    pub fn context(&self) -> Context {
        self.ctx
    }

    pub fn save(self: Pin<&mut Self>, value: Value) -> Saved {
        // SAFETY: nothing is moved out of the frame.
        let this = unsafe { self.get_unchecked_mut() };
        this.ensure_linked();
        let index = this.len + this.overflow.len();
        if this.len < SAVE_FRAME_CAPACITY {
            this.slots[this.len] = value;
            this.len += 1;
        } else {
            this.overflow.push(value);
        }
        Saved(index)
    }

    pub fn get(&self, saved: Saved) -> Value {
        match saved.0.checked_sub(SAVE_FRAME_CAPACITY) {
            None => self.slots[saved.0],
            Some(i) => self.overflow[i],
        }
    }

    pub fn set(self: Pin<&mut Self>, saved: Saved, value: Value) {
        // SAFETY: nothing is moved out of the frame.
        let this = unsafe { self.get_unchecked_mut() };
        match saved.0.checked_sub(SAVE_FRAME_CAPACITY) {
            None => this.slots[saved.0] = value,
            Some(i) => this.overflow[i] = value,
        }
    }

    pub fn len(&self) -> usize {
        self.len + self.overflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.slots[..self.len]
    }

    pub(crate) fn overflow(&self) -> &[Value] {
        &self.overflow
    }

    fn ensure_linked(&mut self) {
        if self.linked {
            return;
        }
        self.prev = self.ctx.saves();
        self.ctx.set_saves(self as *const SaveFrame);
        self.linked = true;
    }
}

impl Drop for SaveFrame {
    fn drop(&mut self) {
        if !self.linked {
            return;
        }
        let self_ptr = self as *const SaveFrame;
        debug_assert_eq!(
            self.ctx.saves(),
            self_ptr,
            "SaveFrame drop must follow LIFO scope order"
        );
        if self.ctx.saves() == self_ptr {
            self.ctx.set_saves(self.prev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Heap, HeapSettings};
    use core::pin::pin;
    use object::TypeTable;

    fn env() -> (Heap, Context) {
        let settings = HeapSettings {
            initial_size: 16 * 1024,
            ..Default::default()
        };
        let mut heap = Heap::new(settings, TypeTable::standard()).expect("heap");
        let ctx = heap.make_context(None).expect("context");
        (heap, ctx)
    }

    #[test]
    fn test_context_layout() {
        let (mut heap, root) = env();
        let child = heap.make_context(Some(root)).expect("child");
        assert!(root.is_in(&heap));
        assert_eq!(root.parent(), None);
        assert_eq!(child.parent(), Some(root));
        assert_eq!(child.env(), Value::NULL);
        assert!(child.saves().is_null());
        assert_eq!(Context::from_value(&heap, child.as_value()), Some(child));
        assert_eq!(Context::from_value(&heap, Value::from_i64(1)), None);
    }

    #[test]
    fn test_frame_links_lazily() {
        let (_heap, ctx) = env();
        let mut frame = pin!(SaveFrame::new(ctx));
        assert!(ctx.saves().is_null());
        let s = frame.as_mut().save(Value::from_i64(5));
        assert!(!ctx.saves().is_null());
        assert_eq!(frame.get(s), Value::from_i64(5));
        frame.as_mut().set(s, Value::TRUE);
        assert_eq!(frame.get(s), Value::TRUE);
    }

    #[test]
    fn test_nested_frames_unlink_in_order() {
        let (_heap, ctx) = env();
        {
            let mut outer = pin!(SaveFrame::new(ctx));
            outer.as_mut().save(Value::from_i64(1));
            let outer_ptr = ctx.saves();
            {
                let mut inner = pin!(SaveFrame::new(ctx));
                inner.as_mut().save(Value::from_i64(2));
                assert_eq!(ctx.save_frames().count(), 2);
            }
            assert_eq!(ctx.saves(), outer_ptr);
            assert_eq!(ctx.save_frames().count(), 1);
        }
        assert!(ctx.saves().is_null());
    }

    #[test]
    fn test_frame_overflows_past_capacity() {
        let (_heap, ctx) = env();
        let mut frame = pin!(SaveFrame::new(ctx));
        let saved: Vec<_> = (0..40)
            .map(|i| frame.as_mut().save(Value::from_i64(i)))
            .collect();
        assert_eq!(frame.len(), 40);
        assert_eq!(frame.values().len(), SAVE_FRAME_CAPACITY);
        assert_eq!(frame.get(saved[39]), Value::from_i64(39));
        assert_eq!(frame.get(saved[3]), Value::from_i64(3));
    }

    #[test]
    fn test_saved_values_survive_collection() {
        let (mut heap, ctx) = env();
        let mut frame = pin!(SaveFrame::new(ctx));
        let mut list = Value::NULL;
        for i in 0..50 {
            list = heap.alloc_pair(ctx, Value::from_i64(i), list).expect("pair");
        }
        let s = frame.as_mut().save(list);
        heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("garbage");

        let swept = heap.collect(ctx);
        assert_eq!(swept.sum_freed, 32);

        let mut cursor = frame.get(s);
        let mut n = 0;
        while let Some(cell) = heap.object(cursor) {
            cursor = heap.cdr(cell.as_value()).expect("cdr");
            n += 1;
        }
        assert_eq!(n, 50);
    }
}
