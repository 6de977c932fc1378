//! Benchmarks for the composite allocators against the system allocator.
//!
//! `AnsiHeap` doesn't implement `GlobalAlloc` (it's the outermost C-ABI
//! adapter, not a Rust layer itself), so each case works directly through
//! its inherent `malloc`/`free`/`realloc`, alongside `System` via
//! `GlobalAlloc` for a baseline.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use heaplayers::composite::{LockedKingsleyHeap, UnsyncKingsleyHeap};
use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;

fn bench_single_alloc_dealloc(c: &mut Criterion) {
    let sizes: &[usize] = &[8, 64, 256, 1024, 4096, 65536];
    let unsync = UnsyncKingsleyHeap::default();
    let locked = LockedKingsleyHeap::default();
    let mut group = c.benchmark_group("single_alloc_dealloc");

    for &size in sizes {
        let layout = Layout::from_size_align(size, 8).unwrap();
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, _| {
            b.iter(|| unsafe {
                let ptr = System.alloc(layout);
                black_box(ptr);
                System.dealloc(ptr, layout);
            })
        });
        group.bench_with_input(BenchmarkId::new("unsync_kingsley", size), &size, |b, _| {
            b.iter(|| {
                let ptr = unsync.malloc(size);
                black_box(ptr);
                unsync.free(ptr);
            })
        });
        group.bench_with_input(BenchmarkId::new("locked_kingsley", size), &size, |b, _| {
            b.iter(|| {
                let ptr = locked.malloc(size);
                black_box(ptr);
                locked.free(ptr);
            })
        });
    }
    group.finish();
}

fn bench_batch_alloc_free(c: &mut Criterion) {
    let sizes: &[usize] = &[8, 64, 512, 4096];
    let n = 1000;
    let unsync = UnsyncKingsleyHeap::default();
    let mut group = c.benchmark_group("batch_1000_alloc_then_free");

    for &size in sizes {
        let layout = Layout::from_size_align(size, 8).unwrap();
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, _| {
            b.iter(|| unsafe {
                let mut ptrs = Vec::with_capacity(n);
                for _ in 0..n {
                    ptrs.push(System.alloc(layout));
                }
                for ptr in ptrs.into_iter().rev() {
                    System.dealloc(ptr, layout);
                }
            })
        });
        group.bench_with_input(BenchmarkId::new("unsync_kingsley", size), &size, |b, _| {
            b.iter(|| {
                let mut ptrs = Vec::with_capacity(n);
                for _ in 0..n {
                    ptrs.push(unsync.malloc(size));
                }
                for ptr in ptrs.into_iter().rev() {
                    unsync.free(ptr);
                }
            })
        });
    }
    group.finish();
}

fn bench_churn(c: &mut Criterion) {
    let sizes: &[usize] = &[32, 256, 2048];
    let rounds = 200;
    let unsync = UnsyncKingsleyHeap::default();
    let mut group = c.benchmark_group("churn_200_rounds");

    for &size in sizes {
        group.throughput(Throughput::Elements(rounds as u64 * 10));

        group.bench_with_input(BenchmarkId::new("unsync_kingsley", size), &size, |b, &size| {
            b.iter(|| {
                let mut live: Vec<*mut u8> = Vec::new();
                for _ in 0..rounds {
                    for _ in 0..10 {
                        live.push(unsync.malloc(size));
                    }
                    let drain = live.len() / 2;
                    for _ in 0..drain {
                        unsync.free(live.pop().unwrap());
                    }
                }
                for ptr in live {
                    unsync.free(ptr);
                }
            })
        });
    }
    group.finish();
}

fn bench_vec_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulated_vec_growth");
    let final_len: usize = 10_000;
    group.throughput(Throughput::Elements(final_len as u64));

    let unsync = UnsyncKingsleyHeap::default();
    let elem = std::mem::size_of::<u64>();

    group.bench_function("unsync_kingsley", |b| {
        b.iter(|| {
            let mut cap = 1usize;
            let mut ptr = unsync.malloc(cap * elem);
            let mut len = 0;
            while len < final_len {
                len += 1;
                if len > cap {
                    let new_cap = cap * 2;
                    ptr = unsync.realloc(ptr, new_cap * elem);
                    cap = new_cap;
                }
            }
            unsync.free(ptr);
        })
    });
    group.bench_function("system", |b| {
        b.iter(|| unsafe {
            let mut cap = 1usize;
            let mut layout = Layout::from_size_align(cap * elem, 8).unwrap();
            let mut ptr = System.alloc(layout);
            let mut len = 0;
            while len < final_len {
                len += 1;
                if len > cap {
                    let new_cap = cap * 2;
                    let new_layout = Layout::from_size_align(new_cap * elem, 8).unwrap();
                    ptr = System.realloc(ptr, layout, new_cap * elem);
                    layout = new_layout;
                    cap = new_cap;
                }
            }
            System.dealloc(ptr, layout);
        })
    });
    group.finish();
}

fn bench_multithreaded(c: &mut Criterion) {
    use std::sync::Arc;

    let mut group = c.benchmark_group("multithreaded_4_threads");
    let ops_per_thread = 5000usize;
    let nthreads = 4;
    group.throughput(Throughput::Elements((ops_per_thread * nthreads) as u64));

    let locked = Arc::new(LockedKingsleyHeap::default());

    group.bench_function("locked_kingsley", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..nthreads)
                .map(|_| {
                    let heap = Arc::clone(&locked);
                    std::thread::spawn(move || {
                        let mut ptrs: Vec<*mut u8> = Vec::with_capacity(100);
                        for _ in 0..ops_per_thread {
                            ptrs.push(heap.malloc(64));
                            if ptrs.len() > 50 {
                                for _ in 0..25 {
                                    heap.free(ptrs.pop().unwrap());
                                }
                            }
                        }
                        for p in ptrs {
                            heap.free(p);
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.bench_function("system", |b| {
        b.iter(|| {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let handles: Vec<_> = (0..nthreads)
                .map(|_| {
                    std::thread::spawn(move || {
                        let mut ptrs: Vec<*mut u8> = Vec::with_capacity(100);
                        for _ in 0..ops_per_thread {
                            unsafe {
                                ptrs.push(System.alloc(layout));
                            }
                            if ptrs.len() > 50 {
                                for _ in 0..25 {
                                    unsafe { System.dealloc(ptrs.pop().unwrap(), layout) };
                                }
                            }
                        }
                        for p in ptrs {
                            unsafe { System.dealloc(p, layout) };
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_alloc_dealloc,
    bench_batch_alloc_free,
    bench_churn,
    bench_vec_growth,
    bench_multithreaded,
);
criterion_main!(benches);
