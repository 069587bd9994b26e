/// Tag constants.
const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b111;
const REF_TAG: u64 = 0b001;
const IMMEDIATE_TAG: u64 = 0b011;
const IMMEDIATE_SHIFT: u32 = 3;

/// A tagged 64-bit value.
///
/// Encoding:
/// - **Fixnum**:    `...XXXXX0`: 63-bit signed integer (low bit 0).
/// - **Reference**: `...XXX001`: heap pointer (mask low 3 bits; requires 8-byte alignment).
/// - **Immediate**: `...XXX011`: `#f`, `#t`, `()` and the unspecified value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const FALSE: Self = Self::immediate(0);
    pub const TRUE: Self = Self::immediate(1);
    pub const NULL: Self = Self::immediate(2);
    pub const VOID: Self = Self::immediate(3);

    const fn immediate(payload: u64) -> Self {
        Self((payload << IMMEDIATE_SHIFT) | IMMEDIATE_TAG)
    }

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(
            (-(1i64 << 62)..(1i64 << 62)).contains(&n),
            "fixnum overflow: {n}"
        );
        Self((n << 1) as u64)
    }

    /// Returns the integer if this is a fixnum.
    #[inline(always)]
    pub const fn as_i64(self) -> Option<i64> {
        if self.is_fixnum() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self::from_addr(ptr as usize)
    }

    #[inline(always)]
    pub fn from_addr(addr: usize) -> Self {
        let addr = addr as u64;
        debug_assert!(addr & TAG_MASK == 0, "pointer not aligned");
        Self(addr | REF_TAG)
    }

    #[inline(always)]
    pub const fn ref_bits(self) -> u64 {
        self.0 & !TAG_MASK
    }

    /// Address of the referenced object, `None` for non-references.
    #[inline(always)]
    pub const fn addr(self) -> Option<usize> {
        if self.is_ref() {
            Some(self.ref_bits() as usize)
        } else {
            None
        }
    }

    // ── Immediates ─────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.0 & TAG_MASK == IMMEDIATE_TAG
    }

    #[inline(always)]
    pub const fn is_false(self) -> bool {
        self.0 == Self::FALSE.0
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::from_raw(0)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::from_i64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(n) = self.as_i64() {
            write!(f, "Fixnum({n})")
        } else if self.is_ref() {
            write!(f, "Ref(0x{:x})", self.ref_bits())
        } else if *self == Self::FALSE {
            f.write_str("#f")
        } else if *self == Self::TRUE {
            f.write_str("#t")
        } else if *self == Self::NULL {
            f.write_str("()")
        } else if *self == Self::VOID {
            f.write_str("#<void>")
        } else {
            write!(f, "Immediate(0x{:016x})", self.0)
        }
    }
}
