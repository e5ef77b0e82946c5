// packages/engine/benches/scheduler_bench.rs
//! Scheduler and dispatch benchmarks
//!
//! Covers the admission hot path: enqueue → dequeue → complete on the
//! scheduler alone, and full `submit` round trips through the pool with
//! workers that return immediately.

use std::sync::Arc;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use gateway_engine::runtime::scheduler::Scheduler;
use gateway_engine::runtime::types::{Priority, QueueEntry, WorkRequest};
use gateway_engine::runtime::worker::{SpawnConfig, WorkerFactory, WorkerHandle};
use gateway_engine::runtime::WorkerLimits;
use gateway_engine::utils::clock::TokioClock;
use gateway_engine::{PoolConfig, WorkerPool};

struct NoopFactory;

struct NoopWorker;

#[async_trait]
impl WorkerFactory for NoopFactory {
    async fn spawn(&self, _config: &SpawnConfig) -> gateway_engine::Result<Arc<dyn WorkerHandle>> {
        Ok(Arc::new(NoopWorker))
    }
}

#[async_trait]
impl WorkerHandle for NoopWorker {
    async fn execute(
        &self,
        payload: Value,
        _cancel: CancellationToken,
    ) -> gateway_engine::Result<Value> {
        Ok(payload)
    }

    async fn kill(&self) -> gateway_engine::Result<()> {
        Ok(())
    }
}

fn entry(seq: u64) -> QueueEntry {
    let priority = match seq % 4 {
        0 => Priority::Low,
        1 => Priority::Normal,
        2 => Priority::High,
        _ => Priority::Critical,
    };
    QueueEntry::from_request(
        WorkRequest::new(format!("req-{}", seq), "bench", json!({})).with_priority(priority),
        seq,
        seq,
    )
}

/// Fill the queue, then drain it in rank order
fn bench_scheduler_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler/cycle");

    for depth in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            b.iter(|| {
                let scheduler = Scheduler::new(depth);
                for seq in 0..depth as u64 {
                    scheduler.enqueue(entry(seq)).unwrap();
                }
                while scheduler.dequeue().is_some() {
                    scheduler.complete();
                }
            });
        });
    }

    group.finish();
}

/// Concurrent submits across distinct sessions
fn bench_pool_submit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("pool/submit");
    for workers in [1usize, 4, 16] {
        group.throughput(Throughput::Elements(64));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let config = PoolConfig {
                    max_workers: workers,
                    min_workers: workers,
                    max_queue_size: 128,
                    limits: WorkerLimits::unlimited(),
                    ..Default::default()
                };
                let pool = WorkerPool::start(config, Arc::new(NoopFactory), TokioClock::shared())
                    .await
                    .unwrap();

                let start = std::time::Instant::now();
                for _ in 0..iters {
                    let submits = (0..64).map(|i| {
                        let pool = pool.clone();
                        tokio::spawn(async move {
                            pool.submit(WorkRequest::new(
                                format!("req-{}", i),
                                format!("session-{}", i),
                                json!({ "n": i }),
                            ))
                            .await
                        })
                    });
                    for handle in futures::future::join_all(submits).await {
                        handle.unwrap().unwrap();
                    }
                }
                let elapsed = start.elapsed();

                pool.shutdown().await;
                elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scheduler_cycle, bench_pool_submit);
criterion_main!(benches);
