//! Deadline heap and scheduler throughput benchmarks.
//!
//! Covers the per-resource hot paths:
//!
//! - Heap push/pop and arbitrary removal.
//! - Scheduling, resetting and expiring many timers through a virtual clock.
//! - A full GC run over grouped and ungrouped candidates.
//!
//! Workloads come from a fixed-seed PCG so runs are comparable.
//!
//! Run with: `cargo bench --bench scheduler_benchmarks`

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use tangle_core::prelude::*;
use tangle_sched::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn deadlines(n: usize, seed: u64) -> Vec<u64> {
    let mut rng = Pcg64::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0..60_000)).collect()
}

struct Loaded {
    clock: Arc<VirtualClock>,
    tracker: GroupTracker,
    scheduler: DeadlineScheduler,
}

/// `n` resources with random deadlines; every fourth pair is grouped.
fn loaded(n: usize, seed: u64) -> Loaded {
    let clock = Arc::new(VirtualClock::new());
    let provider = Arc::new(InMemoryProvider::new());
    let mut tracker = GroupTracker::new(clock.clone());
    let config = SchedulerConfig {
        candidate_watermark: usize::MAX,
        ..SchedulerConfig::default()
    };
    let mut scheduler = DeadlineScheduler::with_config(clock.clone(), provider.clone(), config)
        .expect("default policy is valid");

    for (i, ms) in deadlines(n, seed).into_iter().enumerate() {
        let id = ResourceId::new(i as u64);
        provider.insert(id, 256);
        scheduler.schedule_decoherence(id, Duration::from_millis(ms));
        if i % 8 == 1 {
            let prev = ResourceId::new(i as u64 - 1);
            tracker.create_group(&[prev, id], GroupKind::Bell).unwrap();
        }
    }
    Loaded {
        clock,
        tracker,
        scheduler,
    }
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_heap(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap");
    for &n in &[1_000usize, 10_000] {
        let times = deadlines(n, 1);
        group.bench_with_input(BenchmarkId::new("push_pop", n), &times, |b, times| {
            b.iter(|| {
                let mut heap = DeadlineHeap::new();
                for (i, &at) in times.iter().enumerate() {
                    heap.push(ScheduleEntry::new(
                        ResourceId::new(i as u64),
                        at,
                        Priority::for_duration(at),
                    ));
                }
                while let Some(e) = heap.pop_min() {
                    black_box(e);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("remove", n), &times, |b, times| {
            b.iter_batched(
                || {
                    let mut heap = DeadlineHeap::new();
                    for (i, &at) in times.iter().enumerate() {
                        heap.push(ScheduleEntry::new(ResourceId::new(i as u64), at, Priority::Normal));
                    }
                    heap
                },
                |mut heap| {
                    for i in (0..times.len() as u64).step_by(10) {
                        black_box(heap.remove(ResourceId::new(i)));
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");
    for &n in &[1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("schedule", n), &n, |b, &n| {
            b.iter(|| black_box(loaded(n, 2)));
        });

        group.bench_with_input(BenchmarkId::new("reset_all", n), &n, |b, &n| {
            b.iter_batched(
                || loaded(n, 3),
                |mut l| {
                    for i in 0..n as u64 {
                        black_box(l.scheduler.reset_activity(ResourceId::new(i)));
                    }
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("expire_all", n), &n, |b, &n| {
            b.iter_batched(
                || loaded(n, 4),
                |mut l| {
                    l.clock.advance(60_000);
                    black_box(l.scheduler.process_timer_queue(&mut l.tracker));
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_gc(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc");
    let n = 5_000;
    group.bench_function("trigger_gc", |b| {
        b.iter_batched(
            || {
                let mut l = loaded(n, 5);
                l.clock.advance(30_000);
                l.scheduler.process_timer_queue(&mut l.tracker);
                l
            },
            |mut l| black_box(l.scheduler.trigger_gc(&mut l.tracker, &GcPolicy::default())),
            BatchSize::LargeInput,
        );
    });
    group.bench_function("hybrid_gc", |b| {
        b.iter_batched(
            || {
                let mut l = loaded(n, 6);
                l.clock.advance(30_000);
                l.scheduler.process_timer_queue(&mut l.tracker);
                l
            },
            |mut l| black_box(l.scheduler.perform_hybrid_gc(&mut l.tracker)),
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_heap, bench_scheduler, bench_gc);
criterion_main!(benches);
