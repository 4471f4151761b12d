//! Benchmarks for the replicated task list state.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use swarmlink_core::crdt::{OrderKey, TaskListDelta, TaskListState};
use swarmlink_core::identity::AgentId;

fn agent(n: u8) -> AgentId {
    AgentId::from([n; 32])
}

fn populated(n: usize) -> TaskListState {
    let mut state = TaskListState::new(agent(1));
    for i in 0..n {
        state.add_task(format!("task-{i}"), "bench", 128);
    }
    state
}

fn bench_add_task(c: &mut Criterion) {
    let mut group = c.benchmark_group("tasklist_add");
    for size in [10, 100, 1_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &n| {
            b.iter(|| black_box(populated(n)));
        });
    }
    group.finish();
}

fn bench_apply_full_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("tasklist_apply_full_state");
    for size in [10, 100, 1_000] {
        let full = populated(size).full_state();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("fresh", size), &full, |b, full| {
            b.iter_batched(
                || TaskListState::new(agent(2)),
                |mut replica| black_box(replica.apply(full)),
                criterion::BatchSize::SmallInput,
            );
        });
        group.bench_with_input(BenchmarkId::new("idempotent", size), &full, |b, full| {
            let mut replica = TaskListState::new(agent(2));
            replica.apply(full);
            b.iter(|| black_box(replica.apply(full)));
        });
    }
    group.finish();
}

fn bench_claim_merge(c: &mut Criterion) {
    c.bench_function("tasklist_concurrent_claim_merge", |b| {
        b.iter_batched(
            || {
                let mut left = populated(100);
                let mut right = TaskListState::new(agent(2));
                right.apply(&left.full_state());
                let id = left.list()[50].id;
                let (_, a) = left.claim(id).unwrap();
                let (_, b) = right.claim(id).unwrap();
                (left, a, b)
            },
            |(mut left, a, b): (TaskListState, TaskListDelta, TaskListDelta)| {
                left.apply(&b);
                left.apply(&a);
                black_box(left)
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_full_state(c: &mut Criterion) {
    let state = populated(1_000);
    c.bench_function("tasklist_full_state_1000", |b| {
        b.iter(|| black_box(state.full_state()));
    });
}

fn bench_order_key_between(c: &mut Criterion) {
    let writer = agent(1);
    let mut group = c.benchmark_group("order_key_between");
    group.bench_function("append", |b| {
        b.iter(|| {
            let mut key = OrderKey::first(&writer);
            for _ in 0..1_000 {
                key = OrderKey::after(&key, &writer);
            }
            black_box(key)
        });
    });
    group.bench_function("bisect", |b| {
        // Repeated insertion into the same gap grows the key.
        b.iter(|| {
            let lo = OrderKey::first(&writer);
            let mut hi = OrderKey::after(&lo, &writer);
            for _ in 0..100 {
                hi = OrderKey::between(Some(&lo), Some(&hi), &writer);
            }
            black_box(hi)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_add_task,
    bench_apply_full_state,
    bench_claim_merge,
    bench_full_state,
    bench_order_key_between,
);
criterion_main!(benches);
