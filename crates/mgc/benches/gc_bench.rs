//! MGC Benchmarks
//!
//! Allocation, marking, sweeping and whole cycles on small heaps.
//! Run with: `cargo bench --package mgc`

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use mgc::{GarbageCollector, GcConfig, Phase, SliceRequest, Value};

const HEAP_WSZ: usize = 1 << 16;

fn create_gc() -> GarbageCollector {
    GarbageCollector::new(GcConfig {
        initial_heap_wsz: HEAP_WSZ,
        heap_chunk_min_wsz: HEAP_WSZ,
        ..Default::default()
    })
    .unwrap()
}

/// Rooted list of `len` two-field cells plus as much unrooted garbage
fn populate(gc: &mut GarbageCollector, len: usize) {
    let mut head = Value::UNIT;
    for _ in 0..len {
        let cell = gc.alloc_shr(2, 0).unwrap();
        gc.modify(cell, 1, head).unwrap();
        head = cell;
        gc.alloc_shr(2, 0).unwrap();
    }
    gc.register_root(head);
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");

    for &wosize in &[1usize, 4, 16, 64] {
        group.throughput(Throughput::Elements(1000));
        group.bench_function(format!("wosize_{}", wosize), |b| {
            b.iter_batched(
                create_gc,
                |mut gc| {
                    for _ in 0..1000 {
                        black_box(gc.alloc_shr(wosize, 0).unwrap());
                    }
                    gc
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_mark(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark");
    group.throughput(Throughput::Elements(5000));

    group.bench_function("list_5000", |b| {
        b.iter_batched(
            || {
                let mut gc = create_gc();
                populate(&mut gc, 5000);
                gc.major_slice(SliceRequest::Auto);
                gc
            },
            |mut gc| {
                while gc.phase() == Phase::Mark {
                    black_box(gc.major_slice(SliceRequest::Manual(1 << 20)));
                }
                gc
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");

    group.bench_function("half_garbage", |b| {
        b.iter_batched(
            || {
                let mut gc = create_gc();
                populate(&mut gc, 5000);
                gc.major_slice(SliceRequest::Auto);
                while gc.phase() == Phase::Mark {
                    gc.major_slice(SliceRequest::Manual(1 << 20));
                }
                gc
            },
            |mut gc| {
                while gc.phase() == Phase::Sweep {
                    black_box(gc.major_slice(SliceRequest::Manual(1 << 20)));
                }
                gc
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle");

    group.bench_function("full_major", |b| {
        b.iter_batched(
            || {
                let mut gc = create_gc();
                populate(&mut gc, 2000);
                gc
            },
            |mut gc| {
                gc.full_major();
                gc
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("auto_slices", |b| {
        let mut gc = create_gc();
        populate(&mut gc, 2000);
        b.iter(|| {
            for _ in 0..16 {
                gc.alloc_shr(8, 0).unwrap();
            }
            black_box(gc.major_slice(SliceRequest::Auto))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_allocation, bench_mark, bench_sweep, bench_cycle);
criterion_main!(benches);
