use ahash::AHashSet;
use clap::{Parser as ClapParser, Subcommand};
use log::info;
use std::process;

use heap::{Context, CopyFlags, GrowPolicy, Heap, HeapError, HeapSettings};
use object::{TypeTable, Value, tags};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Initial heap size in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    initial_size: usize,

    /// Maximum heap size in bytes (0 = unbounded)
    #[arg(long, default_value_t = 0)]
    max_size: usize,

    /// Grow only when the heap is both fragmented and crowded
    #[arg(long)]
    strict_growth: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and drop lists of pairs, then report collector statistics
    Churn {
        #[arg(long, default_value_t = 100)]
        rounds: usize,
        #[arg(long, default_value_t = 1000)]
        list_len: usize,
        /// Every n-th list stays reachable
        #[arg(long, default_value_t = 10)]
        keep_every: usize,
    },
    /// Build a cyclic structure, fork the heap and check the copy
    Fork {
        #[arg(long, default_value_t = 256)]
        nodes: usize,
        /// Let the copy finalize its objects itself
        #[arg(long)]
        keep_ownership: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let settings = HeapSettings {
        initial_size: cli.initial_size,
        max_size: cli.max_size,
        grow_policy: if cli.strict_growth {
            GrowPolicy::Both
        } else {
            GrowPolicy::Either
        },
        ..Default::default()
    };

    let result = match cli.command {
        Command::Churn {
            rounds,
            list_len,
            keep_every,
        } => churn(settings, rounds, list_len, keep_every),
        Command::Fork {
            nodes,
            keep_ownership,
        } => fork(settings, nodes, keep_ownership),
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn create_heap(settings: HeapSettings) -> Result<(Heap, Context), HeapError> {
    let mut heap = Heap::new(settings, TypeTable::standard())?;
    let ctx = heap.make_context(None)?;
    Ok((heap, ctx))
}

fn churn(
    settings: HeapSettings,
    rounds: usize,
    list_len: usize,
    keep_every: usize,
) -> Result<(), HeapError> {
    let (mut heap, ctx) = create_heap(settings)?;
    let keep_every = keep_every.max(1);

    for round in 0..rounds {
        let mut list = Value::NULL;
        for i in 0..list_len {
            list = heap.alloc_pair(ctx, Value::from_i64(i as i64), list)?;
        }
        if round % keep_every == 0 {
            let kept = heap.alloc_pair(ctx, list, ctx.env())?;
            ctx.set_env(kept);
        }
    }

    let swept = heap.collect(ctx);
    let stats = heap.stats();
    println!("collections:   {}", stats.collections);
    println!("bytes freed:   {}", stats.bytes_freed);
    println!("growths:       {}", stats.growths);
    println!("last sweep:    {} bytes, largest run {}", swept.sum_freed, swept.max_freed);
    println!(
        "heap:          {} bytes in {} slab(s), {} free",
        heap.total_size(),
        heap.slabs().len(),
        heap.free_bytes()
    );
    Ok(())
}

/// Ring of pairs; every car is a vector pointing back at the ring head.
fn build_ring(heap: &mut Heap, ctx: Context, nodes: usize) -> Result<Value, HeapError> {
    let head = heap.alloc_pair(ctx, Value::NULL, Value::NULL)?;
    ctx.set_env(head);
    let mut last = head;
    for i in 1..nodes {
        let node = heap.alloc_pair(ctx, Value::NULL, Value::NULL)?;
        heap.set_cdr(last, node);
        last = node;
        let back = heap.alloc_vector(ctx, 2, Value::from_i64(i as i64))?;
        heap.vector_set(back, 0, head);
        heap.set_car(node, back);
    }
    heap.set_cdr(last, head);
    Ok(head)
}

/// Counts the references reachable from `root` and how many of them fall
/// outside `heap`.
fn survey(heap: &Heap, root: Value) -> (usize, usize) {
    let mut seen = AHashSet::new();
    let mut stack = vec![root];
    let mut escaped = 0;
    while let Some(v) = stack.pop() {
        if !v.is_ref() || !seen.insert(v) {
            continue;
        }
        let Some(obj) = heap.object(v) else {
            escaped += 1;
            continue;
        };
        match obj.tag() {
            tags::PAIR => {
                stack.extend(heap.car(v));
                stack.extend(heap.cdr(v));
            }
            tags::VECTOR => {
                let len = heap.vector_len(v).unwrap_or(0);
                stack.extend((0..len).filter_map(|i| heap.vector_ref(v, i)));
            }
            _ => {}
        }
    }
    (seen.len(), escaped)
}

fn fork(settings: HeapSettings, nodes: usize, keep_ownership: bool) -> Result<(), HeapError> {
    let (mut heap, ctx) = create_heap(settings)?;
    let ring = build_ring(&mut heap, ctx, nodes.max(1))?;

    let flags = if keep_ownership {
        CopyFlags::KEEP_OWNERSHIP
    } else {
        CopyFlags::empty()
    };
    let (mut copy, copy_ctx) = heap.fork(ctx, flags)?;
    info!(
        "forked 0x{:x} into 0x{:x}",
        heap.slabs()[0].start(),
        copy.slabs()[0].start()
    );

    let (source_refs, _) = survey(&heap, ring);
    let (copy_refs, escaped) = survey(&copy, copy_ctx.env());
    let swept = copy.collect(copy_ctx);
    println!("source references: {source_refs}");
    println!("copy references:   {copy_refs}");
    println!("escaping the copy: {escaped}");
    println!("copy collection freed {} bytes", swept.sum_freed);

    if escaped != 0 || copy_refs != source_refs {
        eprintln!("fork is not self-contained");
        process::exit(2);
    }
    Ok(())
}
