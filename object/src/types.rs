//! Type descriptors: how the collector learns an object's shape.
//!
//! Every heap object begins with a [`Header`] whose tag indexes a
//! [`TypeTable`]. The descriptor found there answers size, pointer-slot,
//! weak-slot and finalizer queries for the object.

use core::ptr::NonNull;

use crate::{Header, Value};

const WORD: usize = size_of::<u64>();

/// Called on an unreachable object just before its storage is reclaimed.
/// Must not allocate.
pub type Finalizer = fn(ObjectRef);

// ── Object handle ──────────────────────────────────────────────────

/// A pointer to a heap object's header.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectRef(NonNull<Header>);

impl ObjectRef {
    /// # Safety
    /// `addr` must be the non-null, 8-byte aligned start of a live object
    /// that stays allocated for as long as the returned handle is used.
    #[inline(always)]
    pub unsafe fn from_addr(addr: usize) -> Self {
        debug_assert!(addr != 0 && addr % WORD == 0);
        // SAFETY: caller guarantees `addr` is non-null.
        Self(unsafe { NonNull::new_unchecked(addr as *mut Header) })
    }

    /// # Safety
    /// Same contract as [`ObjectRef::from_addr`] for reference values.
    #[inline(always)]
    pub unsafe fn from_value(value: Value) -> Option<Self> {
        let addr = value.addr()?;
        if addr == 0 {
            return None;
        }
        Some(unsafe { Self::from_addr(addr) })
    }

    #[inline(always)]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline(always)]
    pub fn as_value(self) -> Value {
        Value::from_addr(self.addr())
    }

    #[inline(always)]
    pub fn header(&self) -> &Header {
        // SAFETY: construction vouched for a live object.
        unsafe { self.0.as_ref() }
    }

    #[inline(always)]
    pub fn tag(self) -> u8 {
        self.header().tag()
    }

    #[inline(always)]
    pub fn word(self, offset: usize) -> u64 {
        debug_assert!(offset % WORD == 0);
        // SAFETY: offset lies inside the object per its descriptor.
        unsafe { (self.addr() as *const u8).add(offset).cast::<u64>().read() }
    }

    #[inline(always)]
    pub fn set_word(self, offset: usize, word: u64) {
        debug_assert!(offset % WORD == 0);
        // SAFETY: offset lies inside the object per its descriptor.
        unsafe { (self.addr() as *mut u8).add(offset).cast::<u64>().write(word) }
    }

    #[inline(always)]
    pub fn value_at(self, offset: usize) -> Value {
        Value::from_raw(self.word(offset))
    }

    #[inline(always)]
    pub fn set_value_at(self, offset: usize, value: Value) {
        self.set_word(offset, value.raw());
    }

    /// Raw pointer to the byte at `offset` in the object body.
    #[inline(always)]
    pub fn byte_ptr(self, offset: usize) -> *mut u8 {
        (self.addr() as *mut u8).wrapping_add(offset)
    }
}

impl core::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ObjectRef(0x{:x})", self.addr())
    }
}

// ── Layout descriptions ────────────────────────────────────────────

/// A fixnum stored at `offset` that scales a variable part of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthField {
    pub offset: usize,
    pub scale: usize,
}

impl LengthField {
    fn read(self, obj: ObjectRef) -> usize {
        let len = obj.value_at(self.offset).as_i64().unwrap_or(0).max(0) as usize;
        len.saturating_mul(self.scale)
    }
}

/// Byte size: `base + length * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSpec {
    pub base: usize,
    pub length: Option<LengthField>,
}

impl SizeSpec {
    pub const fn fixed(base: usize) -> Self {
        Self { base, length: None }
    }

    pub fn size_of(self, obj: ObjectRef) -> usize {
        self.base.saturating_add(self.length.map_or(0, |l| l.read(obj)))
    }
}

/// A run of `count + length * scale` value slots starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpec {
    pub offset: usize,
    pub count: usize,
    pub length: Option<LengthField>,
}

impl SlotSpec {
    pub const NONE: Self = Self::fixed(0, 0);

    pub const fn fixed(offset: usize, count: usize) -> Self {
        Self { offset, count, length: None }
    }

    pub fn count_of(self, obj: ObjectRef) -> usize {
        self.count.saturating_add(self.length.map_or(0, |l| l.read(obj)))
    }
}

/// Shape of one object type.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub name: &'static str,
    pub size: SizeSpec,
    /// Strong pointer slots.
    pub slots: SlotSpec,
    /// Weak key slots, if any.
    pub weak: Option<SlotSpec>,
    /// Ephemeron value slots directly following the weak slots. Cleared
    /// only once every weak slot of the object has been broken.
    pub weak_extra: usize,
    pub finalizer: Option<Finalizer>,
}

impl TypeInfo {
    pub fn byte_size(&self, obj: ObjectRef) -> usize {
        self.size.size_of(obj)
    }

    pub fn pointer_slot_count(&self, obj: ObjectRef) -> usize {
        self.slots.count_of(obj)
    }

    pub fn pointer_slot_base_offset(&self) -> usize {
        self.slots.offset
    }

    pub fn weak_slot_base_offset(&self) -> Option<usize> {
        self.weak.map(|w| w.offset)
    }

    pub fn weak_slot_count(&self, obj: ObjectRef) -> usize {
        self.weak.map_or(0, |w| w.count_of(obj))
    }

    pub fn ephemeron_extra_slot_count(&self) -> usize {
        self.weak_extra
    }

    pub fn finalizer(&self) -> Option<Finalizer> {
        self.finalizer
    }
}

// ── Standard layouts ───────────────────────────────────────────────

/// Tags of the types every [`TypeTable::standard`] table knows.
pub mod tags {
    pub const CONTEXT: u8 = 1;
    pub const PAIR: u8 = 2;
    pub const VECTOR: u8 = 3;
    pub const BYTES: u8 = 4;
    pub const WEAK_BOX: u8 = 5;
    pub const EPHEMERON: u8 = 6;
}

/// Context layout. The heap and saves words hold raw addresses, not values.
pub mod context {
    pub const HEAP_OFFSET: usize = 8;
    pub const SAVES_OFFSET: usize = 16;
    pub const PARENT_OFFSET: usize = 24;
    pub const ENV_OFFSET: usize = 32;
    pub const SIZE: usize = 40;
}

pub mod pair {
    pub const CAR_OFFSET: usize = 8;
    pub const CDR_OFFSET: usize = 16;
    pub const SIZE: usize = 24;
}

/// Vectors and byte strings share this layout: a fixnum length then data.
pub mod sequence {
    pub const LENGTH_OFFSET: usize = 8;
    pub const DATA_OFFSET: usize = 16;
}

pub mod weak_box {
    pub const REF_OFFSET: usize = 8;
    pub const SIZE: usize = 16;
}

pub mod ephemeron {
    pub const KEY_OFFSET: usize = 8;
    pub const VALUE_OFFSET: usize = 16;
    pub const SIZE: usize = 24;
}

impl TypeInfo {
    pub const CONTEXT: Self = Self {
        name: "context",
        size: SizeSpec::fixed(context::SIZE),
        slots: SlotSpec::fixed(context::PARENT_OFFSET, 2),
        weak: None,
        weak_extra: 0,
        finalizer: None,
    };

    pub const PAIR: Self = Self {
        name: "pair",
        size: SizeSpec::fixed(pair::SIZE),
        slots: SlotSpec::fixed(pair::CAR_OFFSET, 2),
        weak: None,
        weak_extra: 0,
        finalizer: None,
    };

    pub const VECTOR: Self = Self {
        name: "vector",
        size: SizeSpec {
            base: sequence::DATA_OFFSET,
            length: Some(LengthField { offset: sequence::LENGTH_OFFSET, scale: WORD }),
        },
        slots: SlotSpec {
            offset: sequence::DATA_OFFSET,
            count: 0,
            length: Some(LengthField { offset: sequence::LENGTH_OFFSET, scale: 1 }),
        },
        weak: None,
        weak_extra: 0,
        finalizer: None,
    };

    pub const BYTES: Self = Self {
        name: "bytes",
        size: SizeSpec {
            base: sequence::DATA_OFFSET,
            length: Some(LengthField { offset: sequence::LENGTH_OFFSET, scale: 1 }),
        },
        slots: SlotSpec::NONE,
        weak: None,
        weak_extra: 0,
        finalizer: None,
    };

    pub const WEAK_BOX: Self = Self {
        name: "weak-box",
        size: SizeSpec::fixed(weak_box::SIZE),
        slots: SlotSpec::NONE,
        weak: Some(SlotSpec::fixed(weak_box::REF_OFFSET, 1)),
        weak_extra: 0,
        finalizer: None,
    };

    pub const EPHEMERON: Self = Self {
        name: "ephemeron",
        size: SizeSpec::fixed(ephemeron::SIZE),
        slots: SlotSpec::fixed(ephemeron::VALUE_OFFSET, 1),
        weak: Some(SlotSpec::fixed(ephemeron::KEY_OFFSET, 1)),
        weak_extra: 1,
        finalizer: None,
    };
}

// ── Table ──────────────────────────────────────────────────────────

/// Descriptor table indexed by header tag. Tag 0 is never valid.
#[derive(Debug, Clone)]
pub struct TypeTable {
    entries: Vec<Option<TypeInfo>>,
}

impl TypeTable {
    /// A table that knows only contexts.
    pub fn new() -> Self {
        Self { entries: vec![None, Some(TypeInfo::CONTEXT)] }
    }

    /// Contexts plus pairs, vectors, byte strings, weak boxes and ephemerons.
    pub fn standard() -> Self {
        let mut table = Self::new();
        for (tag, info) in [
            (tags::PAIR, TypeInfo::PAIR),
            (tags::VECTOR, TypeInfo::VECTOR),
            (tags::BYTES, TypeInfo::BYTES),
            (tags::WEAK_BOX, TypeInfo::WEAK_BOX),
            (tags::EPHEMERON, TypeInfo::EPHEMERON),
        ] {
            let assigned = table.register(info);
            debug_assert_eq!(assigned, Some(tag));
        }
        table
    }

    /// Adds a descriptor under the next free tag. `None` once all 255 tags
    /// are taken.
    pub fn register(&mut self, info: TypeInfo) -> Option<u8> {
        let tag = u8::try_from(self.entries.len()).ok()?;
        self.entries.push(Some(info));
        Some(tag)
    }

    #[inline]
    pub fn get(&self, tag: u8) -> Option<&TypeInfo> {
        self.entries.get(tag as usize)?.as_ref()
    }

    #[inline]
    pub fn is_valid_tag(&self, tag: u8) -> bool {
        self.get(tag).is_some()
    }

    /// One past the highest registered tag.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::standard()
    }
}
