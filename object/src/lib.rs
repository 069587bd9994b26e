mod header;
mod value;
pub mod types;

pub use header::{HEADER_MAGIC, Header, HeaderFlags};
pub use types::{
    Finalizer, LengthField, ObjectRef, SizeSpec, SlotSpec, TypeInfo, TypeTable, tags,
};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;

    // ── Value tagging ──────────────────────────────────────────────

    #[test]
    fn fixnum_round_trip() {
        for &n in &[0i64, 1, -1, 42, -42, i64::MAX >> 1, i64::MIN >> 1] {
            let v = Value::from_i64(n);
            assert!(v.is_fixnum());
            assert!(!v.is_ref());
            assert!(!v.is_immediate());
            assert_eq!(v.as_i64(), Some(n));
        }
    }

    #[test]
    fn fixnum_zero_is_zero_bits() {
        assert_eq!(Value::from_i64(0).raw(), 0);
    }

    #[test]
    fn ref_tagging() {
        let dummy: u64 = 0;
        let ptr = &dummy as *const u64;
        let v = Value::from_ptr(ptr);
        assert!(v.is_ref());
        assert!(!v.is_fixnum());
        assert!(!v.is_immediate());
        assert_eq!(v.addr(), Some(ptr as usize));
        assert_eq!(v.as_i64(), None);
    }

    #[test]
    fn immediates_are_distinct() {
        let all = [Value::FALSE, Value::TRUE, Value::NULL, Value::VOID];
        for (i, a) in all.iter().enumerate() {
            assert!(a.is_immediate());
            assert!(!a.is_ref());
            assert!(!a.is_fixnum());
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(Value::FALSE.is_false());
        assert!(Value::NULL.is_null());
        assert_eq!(Value::from(false), Value::FALSE);
    }

    // ── Header ─────────────────────────────────────────────────────

    #[test]
    fn header_starts_owned_with_magic() {
        let h = Header::new(tags::PAIR);
        assert_eq!(h.tag(), tags::PAIR);
        assert!(h.has_valid_magic());
        assert_eq!(h.flags(), HeaderFlags::OWNED);
    }

    #[test]
    fn header_flags() {
        let h = Header::new(tags::PAIR);
        assert!(!h.is_marked());
        assert!(!h.mark());
        assert!(h.mark());
        assert!(h.is_marked());

        h.add_flag(HeaderFlags::BROKEN);
        h.unmark();
        assert!(!h.is_marked());
        assert!(h.has_flag(HeaderFlags::BROKEN));
        assert!(h.has_flag(HeaderFlags::OWNED));

        h.remove_flag(HeaderFlags::OWNED);
        assert!(!h.has_flag(HeaderFlags::OWNED));
    }

    // ── Descriptors ────────────────────────────────────────────────

    /// A word-aligned buffer standing in for one heap object.
    fn object(words: &mut [u64], tag: u8) -> ObjectRef {
        let hdr = Header::new(tag);
        // SAFETY: Header is 8 bytes and the buffer is word-aligned.
        unsafe { (words.as_mut_ptr() as *mut Header).write(hdr) };
        unsafe { ObjectRef::from_addr(words.as_mut_ptr() as usize) }
    }

    #[test]
    fn standard_tags() {
        let table = TypeTable::standard();
        assert_eq!(table.len(), 7);
        assert!(!table.is_valid_tag(0));
        assert_eq!(table.get(tags::CONTEXT).map(|t| t.name), Some("context"));
        assert_eq!(table.get(tags::PAIR).map(|t| t.name), Some("pair"));
        assert_eq!(table.get(tags::EPHEMERON).map(|t| t.name), Some("ephemeron"));
        assert!(table.get(7).is_none());
    }

    #[test]
    fn register_assigns_next_tag() {
        let mut table = TypeTable::new();
        assert_eq!(table.register(TypeInfo::PAIR), Some(2));
        assert_eq!(table.register(TypeInfo::BYTES), Some(3));
        while table.len() < 256 {
            table.register(TypeInfo::PAIR);
        }
        assert_eq!(table.register(TypeInfo::PAIR), None);
    }

    #[test]
    fn vector_size_follows_length() {
        let mut words = [0u64; 6];
        let obj = object(&mut words, tags::VECTOR);
        obj.set_value_at(types::sequence::LENGTH_OFFSET, Value::from_i64(4));

        let info = TypeInfo::VECTOR;
        assert_eq!(info.byte_size(obj), 16 + 4 * 8);
        assert_eq!(info.pointer_slot_count(obj), 4);
        assert_eq!(info.pointer_slot_base_offset(), 16);
        assert_eq!(info.weak_slot_base_offset(), None);
        assert_eq!(info.weak_slot_count(obj), 0);
    }

    #[test]
    fn bytes_have_no_slots() {
        let mut words = [0u64; 4];
        let obj = object(&mut words, tags::BYTES);
        obj.set_value_at(types::sequence::LENGTH_OFFSET, Value::from_i64(13));

        let info = TypeInfo::BYTES;
        assert_eq!(info.byte_size(obj), 16 + 13);
        assert_eq!(info.pointer_slot_count(obj), 0);
    }

    #[test]
    fn ephemeron_extra_follows_key() {
        let mut words = [0u64; 3];
        let obj = object(&mut words, tags::EPHEMERON);

        let info = TypeInfo::EPHEMERON;
        let key = info.weak_slot_base_offset().unwrap();
        assert_eq!(key, types::ephemeron::KEY_OFFSET);
        assert_eq!(info.weak_slot_count(obj), 1);
        assert_eq!(info.ephemeron_extra_slot_count(), 1);
        assert_eq!(key + 8, types::ephemeron::VALUE_OFFSET);
        assert_eq!(info.pointer_slot_base_offset(), types::ephemeron::VALUE_OFFSET);
    }

    #[test]
    fn object_ref_words() {
        let mut words = [0u64; 3];
        let obj = object(&mut words, tags::PAIR);
        assert_eq!(obj.tag(), tags::PAIR);
        obj.set_value_at(types::pair::CDR_OFFSET, Value::NULL);
        assert_eq!(obj.value_at(types::pair::CDR_OFFSET), Value::NULL);
        assert_eq!(unsafe { ObjectRef::from_value(obj.as_value()) }, Some(obj));
        assert_eq!(unsafe { ObjectRef::from_value(Value::from_i64(3)) }, None);
    }
}
