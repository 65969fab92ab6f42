use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use leaseflake::{
    BitLayout, DEFAULT_EPOCH, HolderIdentity, LeaseConfig, MemoryLeaseStore, SequenceGenerator,
    SequenceStart, SystemClock, ThreadRandom, TimeSource, WorkerLeaseManager,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};
use tokio::runtime::Builder;

/// A clock stuck one hour past the default epoch.
#[derive(Clone, Copy)]
struct FixedMockTime;

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> u64 {
        (DEFAULT_EPOCH + 3_600) * 1_000
    }
}

// IDs per benchmark iteration (per-thread for multi-threaded). Far below the
// default layout's per-second capacity so a fixed clock never rolls over.
const TOTAL_IDS: usize = 4096;

fn generator<T: TimeSource>(time: T, start: SequenceStart) -> SequenceGenerator<T, ThreadRandom> {
    SequenceGenerator::new(BitLayout::default(), 1, start, time, ThreadRandom).unwrap()
}

fn bench_sequential<T: TimeSource>(
    c: &mut Criterion,
    group_name: &str,
    generator_fn: impl Fn() -> SequenceGenerator<T, ThreadRandom>,
) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator = generator_fn();
                for _ in 0..TOTAL_IDS {
                    black_box(generator.generate().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_contended<T: TimeSource + Send + Sync>(
    c: &mut Criterion,
    group_name: &str,
    generator_fn: impl Fn() -> SequenceGenerator<T, ThreadRandom>,
) {
    let mut group = c.benchmark_group(group_name);

    for thread_count in [1, 2, 4, 8] {
        let ids_per_thread = TOTAL_IDS / thread_count;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(format!("elems/{TOTAL_IDS}/threads/{thread_count}"), |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();

                for _ in 0..iters {
                    let generator = generator_fn();
                    let barrier = Barrier::new(thread_count + 1);
                    scope(|s| {
                        for _ in 0..thread_count {
                            let generator = &generator;
                            let barrier = &barrier;
                            s.spawn(move || {
                                barrier.wait();
                                for _ in 0..ids_per_thread {
                                    black_box(generator.generate().unwrap());
                                }
                            });
                        }
                        barrier.wait();
                    });
                }

                start.elapsed()
            });
        });
    }

    group.finish();
}

fn benchmark_mock_sequential_fixed(c: &mut Criterion) {
    bench_sequential(c, "mock/sequential/fixed", || {
        generator(FixedMockTime, SequenceStart::Fixed(0))
    });
}

/// Same as above with a thread-local RNG draw on the first call of a tick.
fn benchmark_mock_sequential_random(c: &mut Criterion) {
    bench_sequential(c, "mock/sequential/random", || {
        generator(FixedMockTime, SequenceStart::from_random_range(1_000))
    });
}

fn benchmark_mock_contended(c: &mut Criterion) {
    bench_contended(c, "mock/contended", || {
        generator(FixedMockTime, SequenceStart::Fixed(0))
    });
}

/// Wall clock: includes the clock read, which dominates the lock.
fn benchmark_system_sequential(c: &mut Criterion) {
    bench_sequential(c, "system/sequential", || {
        generator(SystemClock, SequenceStart::Fixed(0))
    });
}

fn benchmark_layout_decode(c: &mut Criterion) {
    let layout = BitLayout::default();
    let id = layout.compose(3_600, 42, 7);
    c.bench_function("layout/decode", |b| {
        b.iter(|| {
            let id = black_box(id);
            black_box((
                layout.decode_timestamp(id),
                layout.decode_worker(id),
                layout.decode_sequence(id),
            ))
        });
    });
}

/// One acquire/release cycle against the in-memory store.
fn benchmark_lease_cycle(c: &mut Criterion) {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .build()
        .unwrap();

    let config = LeaseConfig {
        max_worker_id: 63,
        ..LeaseConfig::default()
    };
    let manager = Arc::new(WorkerLeaseManager::new(
        Arc::new(MemoryLeaseStore::new()),
        SystemClock,
        config,
    ));
    rt.block_on(manager.seed_pool()).unwrap();
    let identity = HolderIdentity::new("bench");

    c.bench_function("lease/acquire_release", |b| {
        b.to_async(&rt).iter(|| async {
            let worker_id = manager.acquire(&identity).await.unwrap();
            black_box(manager.release(worker_id, &identity).await.unwrap());
        });
    });
}

criterion_group!(
    benches,
    benchmark_mock_sequential_fixed,
    benchmark_mock_sequential_random,
    benchmark_mock_contended,
    benchmark_system_sequential,
    benchmark_layout_decode,
    benchmark_lease_cycle,
);
criterion_main!(benches);
