use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use heap::{Context, Heap, HeapSettings};
use object::{TypeTable, Value};

fn bench_settings(initial_size: usize) -> HeapSettings {
    HeapSettings {
        initial_size,
        max_size: 0,
        ..Default::default()
    }
}

fn create_heap(initial_size: usize) -> (Heap, Context) {
    let mut heap = Heap::new(bench_settings(initial_size), TypeTable::standard()).expect("heap");
    let ctx = heap.make_context(None).expect("context");
    (heap, ctx)
}

/// Builds and drops lists so the allocator keeps running into collections.
fn pair_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap/pair_churn");
    for list_len in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(list_len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(list_len), &list_len, |b, &len| {
            let (mut heap, ctx) = create_heap(256 * 1024);
            b.iter(|| {
                let mut head = Value::NULL;
                for i in 0..len {
                    head = heap
                        .alloc_pair(ctx, Value::from_i64(i as i64), head)
                        .expect("pair");
                }
                black_box(head)
            });
        });
    }
    group.finish();
}

/// Mixed object sizes with a retained working set, which exercises
/// first-fit search and coalescing in the sweeper.
fn mixed_sizes(c: &mut Criterion) {
    c.bench_function("heap/mixed_sizes", |b| {
        let (mut heap, ctx) = create_heap(1024 * 1024);
        let table = heap.alloc_vector(ctx, 128, Value::NULL).expect("table");
        ctx.set_env(table);
        let mut seed = 0x2545_f491_4f6c_dd1du64;
        b.iter(|| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let slot = (seed % 128) as usize;
            let len = (seed >> 8) as usize % 64;
            let v = heap.alloc_vector(ctx, len, Value::NULL).expect("vector");
            heap.vector_set(table, slot, v);
        });
    });
}

fn full_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap/collect");
    for live in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, &live| {
            let (mut heap, ctx) = create_heap(4 * 1024 * 1024);
            let mut head = Value::NULL;
            for i in 0..live {
                head = heap
                    .alloc_pair(ctx, Value::from_i64(i as i64), head)
                    .expect("pair");
            }
            ctx.set_env(head);
            b.iter(|| black_box(heap.collect(ctx)));
        });
    }
    group.finish();
}

criterion_group!(benches, pair_churn, mixed_sizes, full_collection);
criterion_main!(benches);
