use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use relayq_core::{Task, TaskId};
use relayq_infra::engine::{ExecutionEngine, Step, step};
use relayq_infra::progress::{InMemoryProgressStore, ProgressStore};
use relayq_infra::queue::{InMemoryTaskQueue, TaskQueue};
use relayq_infra::retry::{RetryPolicy, RetryScheduler};
use relayq_infra::shutdown::Shutdown;

const TTL: Duration = Duration::from_secs(86_400);

fn engine_with_steps(n: usize) -> ExecutionEngine<Arc<InMemoryProgressStore>> {
    let steps: Vec<Arc<dyn Step>> = (0..n)
        .map(|i| Arc::new(step(format!("step_{i}"), |_| Ok(()))) as Arc<dyn Step>)
        .collect();
    ExecutionEngine::new(Arc::new(InMemoryProgressStore::new()), TTL, steps).unwrap()
}

fn task(n: u64) -> Task {
    Task::new(
        TaskId::new(format!("task_{n}")).unwrap(),
        serde_json::json!({"order": n, "sku": "X-1", "qty": 3}),
    )
}

/// Fresh tasks: every step executes and is recorded.
fn bench_fresh_task_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_fresh_task");
    let shutdown = Shutdown::new();

    for step_count in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(step_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(step_count),
            &step_count,
            |b, &step_count| {
                let engine = engine_with_steps(step_count);
                let mut n = 0u64;
                b.iter(|| {
                    n += 1;
                    let t = task(n);
                    let outcome = engine.run(black_box(&t), &shutdown).unwrap();
                    engine.clear_progress(&t.id).unwrap();
                    outcome
                });
            },
        );
    }

    group.finish();
}

/// Redelivered task: every step is already recorded and skipped.
fn bench_redelivery_skip(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_redelivery");
    let shutdown = Shutdown::new();

    group.bench_function("all_steps_committed_16", |b| {
        let engine = engine_with_steps(16);
        let t = task(1);
        for name in engine.step_names() {
            engine.progress().mark_completed(&t.id, name, TTL).unwrap();
        }
        b.iter(|| engine.run(black_box(&t), &shutdown).unwrap());
    });

    group.finish();
}

fn bench_retry_decision(c: &mut Criterion) {
    let scheduler =
        RetryScheduler::new(RetryPolicy::exponential(32, Duration::from_millis(100)).with_jitter(0.2))
            .unwrap();

    c.bench_function("retry_decide", |b| {
        let t = task(7).with_attempt_count(5);
        let now = chrono::Utc::now();
        b.iter(|| scheduler.decide(black_box(t.clone()), "boom", now));
    });
}

fn bench_queue_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_memory_queue");

    for batch in [1usize, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let queue = InMemoryTaskQueue::new();
            let tasks: Vec<Task> = (0..batch as u64).map(task).collect();
            b.iter(|| {
                for t in &tasks {
                    queue.enqueue("bench", t).unwrap();
                }
                for _ in 0..batch {
                    black_box(queue.dequeue("bench", Duration::ZERO).unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fresh_task_throughput,
    bench_redelivery_skip,
    bench_retry_decision,
    bench_queue_round_trip
);
criterion_main!(benches);
