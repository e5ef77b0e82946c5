// packages/engine/src/runtime/pool.rs
//! Worker pool orchestrator
//!
//! Callers hand a [`WorkRequest`] to [`WorkerPool::submit`] and await exactly
//! one outcome. Requests pass through admission control, the per-session lock
//! and the bounded scheduler before a pooled worker executes them.
//!
//! # Architecture
//!
//! ```text
//! submit ──► admission ──► session lock ──► scheduler ──► dispatch ──► worker
//!   ▲                                                                   │
//!   └──────────────────── reply (oneshot) ◄── check-in ◄────────────────┘
//! ```
//!
//! Dispatch runs on its own task after every enqueue and after every worker is
//! returned, so a waiting entry is picked up as soon as capacity frees and a
//! caller dropping its `submit` future never strands someone else's entry. An
//! entry that finds no worker goes back to the queue with its rank intact; its
//! submitter withdraws it once the request timeout passes.
//!
//! # Shutdown
//!
//! [`WorkerPool::shutdown`] refuses new work, waits for admitted entries to
//! finish (bounded by `drain_timeout_ms`), and only then kills the workers.
//! When the drain bound expires, pending entries are answered with a
//! shutting-down error and in-flight executions are cancelled first.

use crate::observability::names;
use crate::runtime::admission::AdmissionControl;
use crate::runtime::health::{HealthReport, WorkerHealth};
use crate::runtime::latency::LatencyWindow;
use crate::runtime::pool_config::PoolConfig;
use crate::runtime::scheduler::Scheduler;
use crate::runtime::session_lock::SessionLock;
use crate::runtime::types::{PoolMetrics, QueueEntry, WorkRequest, WorkResponse};
use crate::runtime::worker::{Worker, WorkerFactory};
use crate::runtime::worker_registry::{CheckIn, WorkerRegistry};
use crate::utils::clock::SharedClock;
use crate::utils::errors::{BackpressureReason, EngineError, PoolError, QueueFullReason, Result};
use futures::future::BoxFuture;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type Outcome = std::result::Result<WorkResponse, PoolError>;
type Reply = oneshot::Sender<Outcome>;

/// Summary of a completed shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Every admitted entry finished before the drain bound
    pub drained: bool,

    /// Pending entries answered with a shutting-down error
    pub withdrawn: usize,

    /// Executions cancelled after the drain bound expired
    pub cancelled_in_flight: usize,

    /// Workers killed at the end of shutdown
    pub workers_killed: usize,

    /// Shutdown had already been requested; nothing was done
    pub already_shut_down: bool,
}

/// Bounded pool of reusable workers with per-session ordering
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    config: PoolConfig,
    clock: SharedClock,
    scheduler: Scheduler,
    sessions: SessionLock,
    registry: WorkerRegistry,
    health: WorkerHealth,

    /// Reply slots keyed by admission ticket; also the admission gate
    /// serializing enqueue against the start of shutdown
    waiters: Mutex<HashMap<u64, Reply>>,
    latency: Mutex<LatencyWindow>,
    next_seq: AtomicU64,
    total_processed: AtomicU64,
    total_errors: AtomicU64,
    shutting_down: AtomicBool,

    /// Cancels in-flight executions when a drain times out
    cancel: CancellationToken,
    monitor_stop: CancellationToken,

    /// One dispatcher at a time, so dequeue/requeue never races itself
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl WorkerPool {
    /// Validate `config`, prewarm `min_workers` and start the liveness monitor
    pub async fn start(
        config: PoolConfig,
        factory: Arc<dyn WorkerFactory>,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            max_workers = config.max_workers,
            min_workers = config.min_workers,
            max_queue_size = config.max_queue_size,
            "Starting worker pool"
        );

        let shared = Arc::new(PoolShared {
            scheduler: Scheduler::new(config.max_queue_size),
            sessions: SessionLock::new(Arc::clone(&clock)),
            registry: WorkerRegistry::new(
                config.max_workers,
                config.limits.clone(),
                factory,
                Arc::clone(&clock),
            ),
            health: WorkerHealth::new(config.stuck_threshold_ms, config.reap_stuck_workers),
            waiters: Mutex::new(HashMap::new()),
            latency: Mutex::new(LatencyWindow::new(config.latency_window_size)),
            next_seq: AtomicU64::new(0),
            total_processed: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            monitor_stop: CancellationToken::new(),
            dispatch_lock: tokio::sync::Mutex::new(()),
            clock,
            config,
        });

        for _ in 0..shared.config.min_workers {
            if let Err(e) = shared.registry.spawn().await {
                shared.registry.kill_all().await;
                return Err(e);
            }
        }

        spawn_health_monitor(Arc::downgrade(&shared));

        info!("Worker pool ready ({} workers)", shared.registry.len());
        Ok(Self { shared })
    }

    /// Submit a request and wait for its single outcome
    pub async fn submit(&self, request: WorkRequest) -> Outcome {
        counter!(names::SUBMITTED_TOTAL).increment(1);

        let outcome = self.shared.submit(request).await;
        if let Err(e) = &outcome {
            counter!(names::REJECTED_TOTAL, "reason" => e.kind().as_str()).increment(1);
        }
        outcome
    }

    /// Current pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.shared.metrics()
    }

    /// Run one liveness sweep now (the monitor also runs it periodically)
    pub async fn check_health(&self) -> HealthReport {
        self.shared.check_health().await
    }

    /// Drain admitted work, then kill every worker
    ///
    /// Idempotent: later calls return immediately with `already_shut_down`.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shared.shutdown().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Snapshot of the registered workers
    pub fn workers(&self) -> Vec<Worker> {
        self.shared.registry.all_workers()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }
}

impl PoolShared {
    async fn submit(self: &Arc<Self>, request: WorkRequest) -> Outcome {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::backpressure(BackpressureReason::ShuttingDown));
        }

        let metrics = self.metrics();
        if let Err(reason) = AdmissionControl::evaluate(&metrics, &self.config) {
            debug!(request_id = %request.id, %reason, "Request refused by admission control");
            return Err(PoolError::backpressure(reason));
        }

        let shed = AdmissionControl::shed_probability(metrics.backpressure_level, &self.config);
        if shed > 0.0 && rand::thread_rng().gen_bool(shed) {
            debug!(request_id = %request.id, level = metrics.backpressure_level, "Request shed");
            return Err(PoolError::backpressure(BackpressureReason::LoadShed {
                level: metrics.backpressure_level,
            }));
        }

        let timeout = Duration::from_millis(request.timeout_ms);
        let _session = self
            .sessions
            .acquire(&request.session_id, timeout)
            .await
            .map_err(|e| {
                PoolError::queue_full(QueueFullReason::SessionBusy {
                    session_id: e.session_id,
                    waited_ms: e.waited_ms,
                })
            })?;

        let request_id = request.id.clone();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock();
            // Re-checked under the gate: shutdown may have begun while we waited
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(PoolError::backpressure(BackpressureReason::ShuttingDown));
            }

            let entry = QueueEntry::from_request(request, seq, self.clock.now_ms());
            if let Err(e) = self.scheduler.enqueue(entry) {
                return Err(PoolError::queue_full(QueueFullReason::Capacity {
                    max_queue_size: e.max_queue_size,
                }));
            }
            waiters.insert(seq, tx);
        }
        gauge!(names::QUEUE_DEPTH).set(self.scheduler.queue_depth() as f64);
        trace!(request_id = %request_id, seq, "Request admitted");

        self.dispatch();
        self.await_outcome(seq, request_id, timeout, rx).await
        // `_session` drops here, after the outcome is known
    }

    /// Wait for the reply; withdraw the entry if no worker took it in time
    async fn await_outcome(
        &self,
        seq: u64,
        request_id: String,
        timeout: Duration,
        mut rx: oneshot::Receiver<Outcome>,
    ) -> Outcome {
        let mut ticket = PendingTicket::new(self, seq);

        tokio::select! {
            outcome = &mut rx => {
                ticket.disarm();
                return settle(outcome, request_id);
            }
            _ = self.clock.sleep(timeout) => {}
        }

        loop {
            if ticket.withdraw() {
                warn!(
                    request_id = %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "No worker assigned before timeout"
                );
                return Err(PoolError::WorkerTimeout {
                    request_id,
                    reason: format!("no worker available within {}ms", timeout.as_millis()),
                });
            }

            // Already dispatched: the execution is bounded on its own
            tokio::select! {
                outcome = &mut rx => {
                    ticket.disarm();
                    return settle(outcome, request_id);
                }
                _ = self.clock.sleep(self.config.drain_poll_interval()) => {}
            }
        }
    }

    /// Run a dispatch pass on its own task
    ///
    /// Detached from the caller: a dropped `submit`, `check_health` or
    /// `shutdown` future cannot abandon an entry halfway through dispatch.
    fn dispatch(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.pump().await;
        });
    }

    /// Hand pending entries to workers until either runs out
    ///
    /// Boxed: executions spawned here dispatch again when they finish.
    fn pump(self: &Arc<Self>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _dispatching = self.dispatch_lock.lock().await;

            while let Some(entry) = self.scheduler.dequeue() {
                let claim = DequeuedEntry::new(&self.scheduler, entry);
                let acquired = self.registry.acquire().await;
                let Some(entry) = claim.into_inner() else {
                    break;
                };

                match acquired {
                    Ok(Some(worker)) => {
                        let reply = self.waiters.lock().remove(&entry.seq);
                        let shared = Arc::clone(self);
                        tokio::spawn(async move {
                            shared.execute(entry, worker, reply).await;
                        });
                    }
                    Ok(None) => {
                        trace!(request_id = %entry.id, "No worker available, entry stays queued");
                        self.scheduler.requeue(entry);
                        break;
                    }
                    Err(e) => {
                        self.scheduler.complete();
                        let reply = self.waiters.lock().remove(&entry.seq);
                        if let Some(reply) = reply {
                            let _ = reply.send(Err(PoolError::WorkerTimeout {
                                request_id: entry.id,
                                reason: format!("worker spawn failed: {}", e),
                            }));
                        }
                        break;
                    }
                }
            }
        })
    }

    async fn execute(self: Arc<Self>, entry: QueueEntry, worker: Worker, reply: Option<Reply>) {
        let QueueEntry {
            id: request_id,
            payload,
            timeout_ms,
            ..
        } = entry;
        let limit_ms = timeout_ms.min(self.config.limits.worker_timeout_ms);
        let cancel = worker.retired.child_token();
        let started = self.clock.now_ms();

        debug!(request_id = %request_id, worker_id = %worker.id, "Executing request");

        let executed = tokio::select! {
            result = worker.handle.execute(payload, cancel.clone()) => result,
            _ = self.clock.sleep(Duration::from_millis(limit_ms)) => {
                Err(EngineError::ExecutionTimeout(limit_ms))
            }
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            _ = worker.retired.cancelled() => Err(EngineError::Cancelled),
        };
        // Stops any work the handle left running behind the dropped future
        cancel.cancel();

        let finished = self.clock.now_ms();
        let elapsed = finished.saturating_sub(started);
        self.latency.lock().record(elapsed, finished);
        histogram!(names::LATENCY_MS).record(elapsed as f64);

        let outcome = match executed {
            Ok(result) => {
                self.total_processed.fetch_add(1, Ordering::SeqCst);
                counter!(names::PROCESSED_TOTAL).increment(1);
                self.return_worker(&worker.id).await;
                Ok(WorkResponse {
                    request_id,
                    result,
                    processing_time_ms: elapsed,
                    worker_id: worker.id,
                })
            }
            Err(e) => {
                self.total_errors.fetch_add(1, Ordering::SeqCst);
                counter!(names::ERRORS_TOTAL).increment(1);
                warn!(request_id = %request_id, worker_id = %worker.id, "Execution failed: {}", e);

                if poisons_worker(&e) {
                    self.registry.kill(&worker.id).await;
                } else {
                    self.return_worker(&worker.id).await;
                }
                Err(PoolError::ExecutionFailed {
                    request_id,
                    message: e.to_string(),
                })
            }
        };

        // Worker is settled before the slot frees, so a drained pool is idle
        self.scheduler.complete();
        if let Some(reply) = reply {
            // The submitter may have gone away; nothing left to do then
            let _ = reply.send(outcome);
        }

        self.dispatch();
    }

    async fn return_worker(&self, worker_id: &str) {
        if let CheckIn::Recycled(_) = self.registry.check_in(worker_id).await {
            counter!(names::WORKERS_RECYCLED_TOTAL).increment(1);
        }
    }

    /// Answer every pending entry with a shutting-down error
    fn withdraw_pending(&self) -> usize {
        let entries = self.scheduler.drain_pending();
        for entry in &entries {
            let reply = self.waiters.lock().remove(&entry.seq);
            if let Some(reply) = reply {
                let _ = reply.send(Err(PoolError::backpressure(
                    BackpressureReason::ShuttingDown,
                )));
            }
        }
        entries.len()
    }

    fn metrics(&self) -> PoolMetrics {
        let counts = self.registry.counts();
        let now = self.clock.now_ms();
        let (summary, throughput) = {
            let mut window = self.latency.lock();
            (window.summary(), window.throughput_per_minute(now))
        };

        let mut metrics = PoolMetrics {
            active_workers: counts.busy,
            idle_workers: counts.idle,
            stuck_workers: counts.stuck,
            queue_depth: self.scheduler.queue_depth(),
            total_processed: self.total_processed.load(Ordering::SeqCst),
            total_errors: self.total_errors.load(Ordering::SeqCst),
            avg_latency_ms: summary.avg_ms,
            p95_latency_ms: summary.p95_ms,
            p99_latency_ms: summary.p99_ms,
            throughput_per_minute: throughput,
            backpressure_level: 0.0,
        };
        metrics.backpressure_level = AdmissionControl::level(&metrics, &self.config);

        publish_gauges(&metrics);
        metrics
    }

    async fn check_health(self: &Arc<Self>) -> HealthReport {
        let report = self.health.sweep(&self.registry, self.clock.now_ms()).await;
        if !report.newly_stuck.is_empty() {
            counter!(names::WORKERS_STUCK_TOTAL).increment(report.newly_stuck.len() as u64);
        }
        if !report.reaped.is_empty() {
            // Reaped slots can take queued work
            self.dispatch();
        }
        report
    }

    async fn shutdown(self: &Arc<Self>) -> ShutdownReport {
        {
            let _gate = self.waiters.lock();
            if self.shutting_down.swap(true, Ordering::SeqCst) {
                debug!("Shutdown already requested");
                return ShutdownReport {
                    already_shut_down: true,
                    ..Default::default()
                };
            }
        }

        info!(queue_depth = self.scheduler.queue_depth(), "Shutting down worker pool");

        let deadline = self.clock.now_ms() + self.config.drain_timeout_ms;
        let mut drained = true;
        while self.scheduler.queue_depth() > 0 {
            if self.clock.now_ms() >= deadline {
                drained = false;
                break;
            }
            self.dispatch();
            self.clock.sleep(self.config.drain_poll_interval()).await;
        }

        let mut withdrawn = 0;
        let mut cancelled_in_flight = 0;
        if !drained {
            warn!(
                drain_timeout_ms = self.config.drain_timeout_ms,
                "Drain timed out, cancelling remaining work"
            );

            withdrawn = self.withdraw_pending();
            cancelled_in_flight = self.scheduler.stats().reserved;
            self.cancel.cancel();

            // A dispatcher may still hand an entry back after the first sweep
            while self.scheduler.queue_depth() > 0 {
                self.clock.sleep(self.config.drain_poll_interval()).await;
                withdrawn += self.withdraw_pending();
            }
        }

        self.monitor_stop.cancel();
        let workers_killed = self.registry.kill_all().await;
        self.metrics();

        info!(
            drained,
            withdrawn,
            cancelled_in_flight,
            workers_killed,
            "Worker pool shut down"
        );
        ShutdownReport {
            drained,
            withdrawn,
            cancelled_in_flight,
            workers_killed,
            already_shut_down: false,
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        self.monitor_stop.cancel();
    }
}

/// Periodic liveness sweep; stops with the pool
fn spawn_health_monitor(pool: Weak<PoolShared>) {
    let Some(shared) = pool.upgrade() else {
        return;
    };
    let stop = shared.monitor_stop.clone();
    let clock = Arc::clone(&shared.clock);
    let interval = shared.config.heartbeat_interval();
    drop(shared);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = clock.sleep(interval) => {}
            }
            let Some(shared) = pool.upgrade() else {
                break;
            };
            shared.check_health().await;
        }
        debug!("Health monitor stopped");
    });
}

/// Errors after which the worker's state is unknown
fn poisons_worker(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::ExecutionTimeout(_)
            | EngineError::Cancelled
            | EngineError::WorkerExited(_)
            | EngineError::Protocol(_)
            | EngineError::Io(_)
    )
}

fn settle(
    received: std::result::Result<Outcome, oneshot::error::RecvError>,
    request_id: String,
) -> Outcome {
    received.unwrap_or_else(|_| {
        Err(PoolError::ExecutionFailed {
            request_id,
            message: "execution ended without a result".to_string(),
        })
    })
}

fn publish_gauges(metrics: &PoolMetrics) {
    gauge!(names::QUEUE_DEPTH).set(metrics.queue_depth as f64);
    gauge!(names::WORKERS, "state" => "busy").set(metrics.active_workers as f64);
    gauge!(names::WORKERS, "state" => "idle").set(metrics.idle_workers as f64);
    gauge!(names::WORKERS, "state" => "stuck").set(metrics.stuck_workers as f64);
    gauge!(names::BACKPRESSURE_LEVEL).set(metrics.backpressure_level);
}

/// An entry taken off the queue but not yet handed to a worker
///
/// Goes back to the queue, slot and rank intact, if dropped before
/// [`into_inner`](Self::into_inner).
struct DequeuedEntry<'a> {
    scheduler: &'a Scheduler,
    entry: Option<QueueEntry>,
}

impl<'a> DequeuedEntry<'a> {
    fn new(scheduler: &'a Scheduler, entry: QueueEntry) -> Self {
        Self {
            scheduler,
            entry: Some(entry),
        }
    }

    fn into_inner(mut self) -> Option<QueueEntry> {
        self.entry.take()
    }
}

impl Drop for DequeuedEntry<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            debug!(request_id = %entry.id, "Dispatch interrupted, entry requeued");
            self.scheduler.requeue(entry);
        }
    }
}

/// A submitter's claim on its queued entry
///
/// Withdraws the entry on drop unless it was dispatched or answered, so a
/// caller that stops waiting never leaves work behind in the queue.
struct PendingTicket<'a> {
    shared: &'a PoolShared,
    seq: u64,
    armed: bool,
}

impl<'a> PendingTicket<'a> {
    fn new(shared: &'a PoolShared, seq: u64) -> Self {
        Self {
            shared,
            seq,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Remove the entry if it is still waiting for a worker
    fn withdraw(&mut self) -> bool {
        if self.shared.scheduler.remove(self.seq).is_none() {
            return false;
        }
        self.shared.waiters.lock().remove(&self.seq);
        self.armed = false;
        true
    }
}

impl Drop for PendingTicket<'_> {
    fn drop(&mut self) {
        if self.armed && self.withdraw() {
            debug!(seq = self.seq, "Submitter went away, entry withdrawn");
        }
    }
}
