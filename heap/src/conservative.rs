//! Conservative roots from native stack words.
//!
//! Any word of a stack snapshot that equals the address of an unfreed,
//! unmarked object (raw or tagged as a reference) makes that object a root.
//! A colliding integer can keep garbage alive; a live object is never lost.
//!
//! Snapshots come either from the host ([`StackSnapshot::from_words`]) or
//! from [`StackSnapshot::capture`], the only code here that reads memory it
//! does not own.

use ahash::AHashSet;
use log::trace;
use object::{Value, tags};

use crate::{Context, HeapInner, SweepStats, mark::Marker};

const WORD: usize = size_of::<u64>();

/// Words above the recording frame that still count as stack, so that
/// locals of the caller of [`StackBase::here`] are covered.
const BASE_SLACK_WORDS: usize = 32;

/// The outermost stack address a capture reads up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBase(usize);

impl StackBase {
    /// Records the current frame as the stack base.
    #[inline(always)]
    pub fn here() -> Self {
        let marker = 0usize;
        let addr = core::hint::black_box(&marker) as *const usize as usize;
        Self(addr + BASE_SLACK_WORDS * WORD)
    }

    pub fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct StackSnapshot {
    words: Vec<u64>,
}

impl StackSnapshot {
    pub fn from_words(words: impl Into<Vec<u64>>) -> Self {
        Self {
            words: words.into(),
        }
    }

    /// Copies every word between the current frame and `base`.
    ///
    /// # Safety
    /// `base` must have been recorded on this thread's stack by a frame
    /// that is still active, so the whole range is mapped stack memory.
    #[inline(never)]
    pub unsafe fn capture(base: StackBase) -> Self {
        let marker = 0usize;
        let start = core::hint::black_box(&marker) as *const usize as usize;
        let start = (start + WORD - 1) & !(WORD - 1);
        let mut words = Vec::with_capacity(base.0.saturating_sub(start) / WORD);
        let mut p = start;
        while p < base.0 {
            // SAFETY: [start, base) is live stack per the caller's contract.
            words.push(unsafe { core::ptr::read_volatile(p as *const u64) });
            p += WORD;
        }
        Self { words }
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn candidates(&self) -> AHashSet<u64> {
        self.words.iter().copied().collect()
    }
}

/// A word names `addr` when it is the address itself or a reference to it.
fn names(candidates: &AHashSet<u64>, addr: usize) -> bool {
    candidates.contains(&(addr as u64)) || candidates.contains(&Value::from_addr(addr).raw())
}

impl HeapInner {
    /// Makes every later collection capture the native stack up to `base`.
    pub fn set_stack_base(&mut self, base: StackBase) {
        self.stack_base = Some(base);
    }

    pub fn stack_base(&self) -> Option<StackBase> {
        self.stack_base
    }

    /// Marks from every unmarked object named by `snapshot`. Returns the
    /// number of objects that became roots this way.
    pub(crate) fn conservative_mark(&self, snapshot: &StackSnapshot) -> usize {
        if snapshot.is_empty() {
            return 0;
        }
        let candidates = snapshot.candidates();
        let mut marker = Marker::new(self);
        let mut hits = 0;
        for slab in &self.slabs {
            for obj in slab.live_objects(&self.types) {
                if obj.header().is_marked() || !names(&candidates, obj.addr()) {
                    continue;
                }
                if self.settings.preserve_tag.is_some_and(|tag| tag != obj.tag()) {
                    continue;
                }
                trace!("conservative root 0x{:x} (tag {})", obj.addr(), obj.tag());
                marker.mark(obj.as_value());
                hits += 1;
            }
        }
        hits
    }

    /// Collection with an explicit snapshot instead of a stack capture.
    pub fn collect_with_snapshot(&mut self, ctx: Context, snapshot: &StackSnapshot) -> SweepStats {
        self.mark_roots(Some(ctx));
        self.conservative_mark(snapshot);
        self.finish_collection(Some(ctx))
    }

    /// The first context of this heap named by a snapshot word.
    pub fn find_context(&self, snapshot: &StackSnapshot) -> Option<Context> {
        let mut contexts = AHashSet::new();
        for slab in &self.slabs {
            for obj in slab.live_objects(&self.types) {
                if obj.tag() != tags::CONTEXT {
                    continue;
                }
                // SAFETY: tag checked above.
                let ctx = unsafe { Context::from_object_unchecked(obj) };
                if ctx.is_in(self) {
                    contexts.insert(obj.addr());
                }
            }
        }
        snapshot.words.iter().find_map(|&word| {
            let value = Value::from_raw(word);
            let addr = value.addr().unwrap_or(word as usize);
            contexts
                .contains(&addr)
                .then(|| Context::from_value(self, Value::from_addr(addr)))
                .flatten()
        })
    }
}
