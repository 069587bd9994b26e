//! Typed allocation helpers and accessors for the standard layouts.
//!
//! Every helper roots its argument values for the duration of its own
//! allocation, so callers need not save values they are about to store.

use object::{
    ObjectRef, Value, tags,
    types::{ephemeron, pair, sequence, weak_box},
};

use crate::{Context, HeapError, HeapInner};

const WORD: usize = size_of::<u64>();

impl HeapInner {
    /// Runs `f` with `values` rooted.
    fn with_scratch<R>(&mut self, values: &[Value], f: impl FnOnce(&mut Self) -> R) -> R {
        let len = self.scratch.len();
        self.scratch.extend_from_slice(values);
        let result = f(self);
        self.scratch.truncate(len);
        result
    }

    pub fn alloc_pair(&mut self, ctx: Context, car: Value, cdr: Value) -> Result<Value, HeapError> {
        let obj = self.with_scratch(&[car, cdr], |heap| {
            heap.allocate_object(ctx, tags::PAIR, pair::SIZE)
        })?;
        obj.set_value_at(pair::CAR_OFFSET, car);
        obj.set_value_at(pair::CDR_OFFSET, cdr);
        Ok(obj.as_value())
    }

    pub fn alloc_vector(&mut self, ctx: Context, len: usize, fill: Value) -> Result<Value, HeapError> {
        let size = len
            .checked_mul(WORD)
            .and_then(|n| n.checked_add(sequence::DATA_OFFSET))
            .ok_or_else(|| self.overflowed())?;
        let obj = self.with_scratch(&[fill], |heap| {
            heap.allocate_object(ctx, tags::VECTOR, size)
        })?;
        obj.set_value_at(sequence::LENGTH_OFFSET, Value::from_i64(len as i64));
        for i in 0..len {
            obj.set_value_at(sequence::DATA_OFFSET + i * WORD, fill);
        }
        Ok(obj.as_value())
    }

    pub fn alloc_bytes(&mut self, ctx: Context, bytes: &[u8]) -> Result<Value, HeapError> {
        let size = bytes
            .len()
            .checked_add(sequence::DATA_OFFSET)
            .ok_or_else(|| self.overflowed())?;
        let obj = self.allocate_object(ctx, tags::BYTES, size)?;
        obj.set_value_at(sequence::LENGTH_OFFSET, Value::from_i64(bytes.len() as i64));
        // SAFETY: the block holds DATA_OFFSET + len bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                obj.byte_ptr(sequence::DATA_OFFSET),
                bytes.len(),
            );
        }
        Ok(obj.as_value())
    }

    /// A box whose single slot does not keep `target` alive.
    pub fn alloc_weak_box(&mut self, ctx: Context, target: Value) -> Result<Value, HeapError> {
        let obj = self.with_scratch(&[target], |heap| {
            heap.allocate_object(ctx, tags::WEAK_BOX, weak_box::SIZE)
        })?;
        obj.set_value_at(weak_box::REF_OFFSET, target);
        Ok(obj.as_value())
    }

    /// A weak `key` whose `value` is dropped once the key is collected.
    pub fn alloc_ephemeron(&mut self, ctx: Context, key: Value, value: Value) -> Result<Value, HeapError> {
        let obj = self.with_scratch(&[key, value], |heap| {
            heap.allocate_object(ctx, tags::EPHEMERON, ephemeron::SIZE)
        })?;
        obj.set_value_at(ephemeron::KEY_OFFSET, key);
        obj.set_value_at(ephemeron::VALUE_OFFSET, value);
        Ok(obj.as_value())
    }

    /// A request whose byte size does not fit in a `usize`.
    fn overflowed(&mut self) -> HeapError {
        self.stats.out_of_memory += 1;
        HeapError::OutOfMemory {
            requested: usize::MAX,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────

    fn tagged(&self, value: Value, tag: u8) -> Option<ObjectRef> {
        self.object(value).filter(|obj| obj.tag() == tag)
    }

    pub fn car(&self, cell: Value) -> Option<Value> {
        Some(self.tagged(cell, tags::PAIR)?.value_at(pair::CAR_OFFSET))
    }

    pub fn cdr(&self, cell: Value) -> Option<Value> {
        Some(self.tagged(cell, tags::PAIR)?.value_at(pair::CDR_OFFSET))
    }

    pub fn set_car(&self, cell: Value, value: Value) -> bool {
        self.tagged(cell, tags::PAIR)
            .map(|obj| obj.set_value_at(pair::CAR_OFFSET, value))
            .is_some()
    }

    pub fn set_cdr(&self, cell: Value, value: Value) -> bool {
        self.tagged(cell, tags::PAIR)
            .map(|obj| obj.set_value_at(pair::CDR_OFFSET, value))
            .is_some()
    }

    pub fn vector_len(&self, vector: Value) -> Option<usize> {
        let obj = self.tagged(vector, tags::VECTOR)?;
        obj.value_at(sequence::LENGTH_OFFSET).as_i64().map(|n| n as usize)
    }

    pub fn vector_ref(&self, vector: Value, index: usize) -> Option<Value> {
        let obj = self.tagged(vector, tags::VECTOR)?;
        let len = obj.value_at(sequence::LENGTH_OFFSET).as_i64()? as usize;
        (index < len).then(|| obj.value_at(sequence::DATA_OFFSET + index * WORD))
    }

    pub fn vector_set(&self, vector: Value, index: usize, value: Value) -> bool {
        let Some(obj) = self.tagged(vector, tags::VECTOR) else {
            return false;
        };
        let len = obj.value_at(sequence::LENGTH_OFFSET).as_i64().unwrap_or(0) as usize;
        if index >= len {
            return false;
        }
        obj.set_value_at(sequence::DATA_OFFSET + index * WORD, value);
        true
    }

    pub fn bytes(&self, bytes: Value) -> Option<&[u8]> {
        let obj = self.tagged(bytes, tags::BYTES)?;
        let len = obj.value_at(sequence::LENGTH_OFFSET).as_i64()? as usize;
        // SAFETY: a live byte string holds `len` bytes after its length.
        Some(unsafe { core::slice::from_raw_parts(obj.byte_ptr(sequence::DATA_OFFSET), len) })
    }

    pub fn weak_box_ref(&self, weak: Value) -> Option<Value> {
        Some(self.tagged(weak, tags::WEAK_BOX)?.value_at(weak_box::REF_OFFSET))
    }

    pub fn ephemeron_key(&self, eph: Value) -> Option<Value> {
        Some(self.tagged(eph, tags::EPHEMERON)?.value_at(ephemeron::KEY_OFFSET))
    }

    pub fn ephemeron_value(&self, eph: Value) -> Option<Value> {
        Some(self.tagged(eph, tags::EPHEMERON)?.value_at(ephemeron::VALUE_OFFSET))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Heap, HeapError, HeapSettings};
    use object::{TypeTable, Value};

    #[test]
    fn test_typed_helpers() {
        let mut heap = Heap::new(HeapSettings::default(), TypeTable::standard()).expect("heap");
        let ctx = heap.make_context(None).expect("context");

        let cell = heap.alloc_pair(ctx, Value::from_i64(1), Value::NULL).expect("pair");
        assert_eq!(heap.car(cell), Some(Value::from_i64(1)));
        assert_eq!(heap.cdr(cell), Some(Value::NULL));
        assert!(heap.set_car(cell, Value::TRUE));
        assert_eq!(heap.car(cell), Some(Value::TRUE));

        let vec = heap.alloc_vector(ctx, 3, cell).expect("vector");
        assert_eq!(heap.vector_len(vec), Some(3));
        assert_eq!(heap.vector_ref(vec, 2), Some(cell));
        assert_eq!(heap.vector_ref(vec, 3), None);
        assert!(heap.vector_set(vec, 0, Value::FALSE));
        assert!(!heap.vector_set(vec, 9, Value::FALSE));
        assert_eq!(heap.car(vec), None);

        let bytes = heap.alloc_bytes(ctx, b"hello").expect("bytes");
        assert_eq!(heap.bytes(bytes), Some(&b"hello"[..]));
    }

    #[test]
    fn test_helper_arguments_survive_their_own_collection() {
        let settings = HeapSettings {
            initial_size: 256,
            max_size: 256,
            ..Default::default()
        };
        let mut heap = Heap::new(settings, TypeTable::standard()).expect("heap");
        let ctx = heap.make_context(None).expect("context");

        // 256 - sentinel - context leaves room for exactly six pairs.
        let pairs: Vec<Value> = (0..6)
            .map(|i| heap.alloc_pair(ctx, Value::from_i64(i), Value::NULL).expect("pair"))
            .collect();
        assert_eq!(heap.free_bytes(), 0);

        let cell = heap.alloc_pair(ctx, pairs[4], pairs[5]).expect("cell");
        assert_eq!(heap.stats().collections, 1);
        assert_eq!(cell, pairs[0], "reuses the first freed block");
        assert_eq!(heap.car(cell), Some(pairs[4]));
        assert_eq!(heap.car(pairs[4]), Some(Value::from_i64(4)));
        assert_eq!(heap.car(pairs[5]), Some(Value::from_i64(5)));
        assert_eq!(heap.free_bytes(), 3 * 32);
    }

    #[test]
    fn test_oversized_helpers_are_out_of_memory() {
        let settings = HeapSettings {
            initial_size: 4096,
            ..Default::default()
        };
        let mut heap = Heap::new(settings, TypeTable::standard()).expect("heap");
        let ctx = heap.make_context(None).expect("context");
        let free = heap.free_bytes();

        let err = heap.alloc_vector(ctx, usize::MAX / 4, Value::NULL);
        assert!(matches!(err, Err(HeapError::OutOfMemory { .. })));
        let err = heap.alloc_vector(ctx, usize::MAX / 16, Value::NULL);
        assert!(matches!(err, Err(HeapError::OutOfMemory { .. })));
        assert_eq!(heap.stats().out_of_memory, 2);

        // Nothing was handed out and the heap still works.
        assert_eq!(heap.free_bytes(), free);
        let vec = heap.alloc_vector(ctx, 4, Value::NULL).expect("vector");
        assert_eq!(heap.vector_len(vec), Some(4));
    }
}
