#![cfg(feature = "weak-refs")]

use heap::{Context, Heap, HeapSettings};
use object::{HeaderFlags, TypeInfo, TypeTable, Value, types::SlotSpec};

fn create_heap(types: TypeTable) -> (Heap, Context) {
    let settings = HeapSettings {
        initial_size: 64 * 1024,
        ..Default::default()
    };
    let mut heap = Heap::new(settings, types).expect("heap");
    let ctx = heap.make_context(None).expect("context");
    (heap, ctx)
}

#[test]
fn test_weak_slot_law() {
    let (mut heap, ctx) = create_heap(TypeTable::standard());
    let only_weak = heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("target");
    let also_strong = heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("target");
    let w1 = heap.alloc_weak_box(ctx, only_weak).expect("weak");
    let w2 = heap.alloc_weak_box(ctx, also_strong).expect("weak");
    let boxes = heap.alloc_pair(ctx, w1, w2).expect("boxes");
    let root = heap.alloc_pair(ctx, boxes, also_strong).expect("root");
    ctx.set_env(root);

    heap.collect(ctx);
    assert_eq!(heap.weak_box_ref(w1), Some(Value::FALSE));
    assert!(heap.object(w1).unwrap().header().has_flag(HeaderFlags::BROKEN));
    assert_eq!(heap.weak_box_ref(w2), Some(also_strong));
    assert!(!heap.object(w2).unwrap().header().has_flag(HeaderFlags::BROKEN));
}

/// An ephemeron table entry with two keys and two values:
/// `[header | key0 | key1 | value0 | value1]`.
const PAIRED_SIZE: usize = 40;

fn paired_type() -> TypeInfo {
    TypeInfo {
        name: "two-key-ephemeron",
        size: object::SizeSpec::fixed(PAIRED_SIZE),
        slots: SlotSpec::fixed(24, 2),
        weak: Some(SlotSpec::fixed(8, 2)),
        weak_extra: 2,
        finalizer: None,
    }
}

#[test]
fn test_ephemeron_law() {
    let mut types = TypeTable::standard();
    let tag = types.register(paired_type()).expect("tag");
    let (mut heap, ctx) = create_heap(types);

    let keys = [
        heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("k0"),
        heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("k1"),
    ];
    let values = [
        heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("v0"),
        heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("v1"),
    ];
    let holder = heap.alloc_pair(ctx, keys[0], keys[1]).expect("holder");
    let entry = heap.allocate_object(ctx, tag, PAIRED_SIZE).expect("entry");
    for (i, v) in keys.iter().chain(&values).enumerate() {
        entry.set_value_at(8 + i * 8, *v);
    }
    let root = heap.alloc_pair(ctx, entry.as_value(), holder).expect("root");
    ctx.set_env(root);

    // One key still strongly held: values stay.
    heap.set_car(holder, Value::NULL);
    heap.collect(ctx);
    assert_eq!(entry.value_at(8), Value::FALSE);
    assert_eq!(entry.value_at(16), keys[1]);
    assert_eq!(entry.value_at(24), values[0]);
    assert_eq!(entry.value_at(32), values[1]);

    // The other key dies, but key0 was already cleared last cycle, so not
    // every key broke in this one: values stay once more.
    heap.set_cdr(root, Value::NULL);
    heap.collect(ctx);
    assert_eq!(entry.value_at(16), Value::FALSE);
    assert_eq!(entry.value_at(24), values[0]);

    // Both keys dying in the same cycle clears both values.
    let (mut heap, ctx) = create_heap({
        let mut types = TypeTable::standard();
        types.register(paired_type());
        types
    });
    let k0 = heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("k0");
    let k1 = heap.alloc_pair(ctx, Value::NULL, Value::NULL).expect("k1");
    let entry = heap.allocate_object(ctx, tag, PAIRED_SIZE).expect("entry");
    entry.set_value_at(8, k0);
    entry.set_value_at(16, k1);
    entry.set_value_at(24, Value::from_i64(1));
    entry.set_value_at(32, Value::from_i64(2));
    ctx.set_env(entry.as_value());

    heap.collect(ctx);
    assert!(entry.header().has_flag(HeaderFlags::BROKEN));
    for offset in [8, 16, 24, 32] {
        assert_eq!(entry.value_at(offset), Value::FALSE);
    }
}
