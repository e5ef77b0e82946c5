// packages/engine/src/runtime/worker_registry.rs
//! Registry of reusable workers
//!
//! # Architecture
//!
//! ```text
//! WorkerRegistry (max_workers)
//! ├─ Idle:  [worker-0, worker-3]   (assignable, first idle wins)
//! ├─ Busy:  [worker-1]             (executing one entry)
//! ├─ Stuck: [worker-2]             (busy past the liveness threshold)
//! └─ Spawning: 1                   (reserved slot, factory call in flight)
//! ```
//!
//! Idle workers are reused before a new one is spawned. Spawns in flight are
//! counted against `max_workers`, so concurrent callers can never overshoot
//! the bound while the factory is running.

use crate::runtime::worker::{SpawnConfig, Worker, WorkerFactory, WorkerState};
use crate::runtime::worker_limits::WorkerLimits;
use crate::utils::clock::SharedClock;
use crate::utils::errors::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Worker counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerCounts {
    pub busy: usize,
    pub idle: usize,
    pub stuck: usize,
}

impl WorkerCounts {
    pub fn total(&self) -> usize {
        self.busy + self.idle + self.stuck
    }
}

/// What happened to a worker handed back after an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckIn {
    /// Back in the idle set
    Returned,
    /// Killed and removed because it hit a limit
    Recycled(String),
    /// No longer registered (killed while it was executing)
    Unknown,
}

#[derive(Debug, Default)]
struct RegistryState {
    workers: Vec<Worker>,
    spawning: usize,
    next_id: u64,
}

/// A `max_workers` slot held while the factory runs
///
/// Released on drop, so a spawn abandoned mid-flight gives its slot back.
struct SpawnSlot<'a> {
    state: &'a Mutex<RegistryState>,
    held: bool,
}

impl<'a> SpawnSlot<'a> {
    /// Turn the reservation into a registered worker
    fn fill(mut self, worker: Worker) {
        let mut state = self.state.lock();
        state.spawning -= 1;
        state.workers.push(worker);
        self.held = false;
    }
}

impl Drop for SpawnSlot<'_> {
    fn drop(&mut self) {
        if self.held {
            self.state.lock().spawning -= 1;
        }
    }
}

/// Bounded set of pooled workers
pub struct WorkerRegistry {
    max_workers: usize,
    limits: WorkerLimits,
    factory: Arc<dyn WorkerFactory>,
    clock: SharedClock,
    state: Mutex<RegistryState>,
}

impl WorkerRegistry {
    pub fn new(
        max_workers: usize,
        limits: WorkerLimits,
        factory: Arc<dyn WorkerFactory>,
        clock: SharedClock,
    ) -> Self {
        Self {
            max_workers,
            limits,
            factory,
            clock,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Snapshot of every registered worker
    pub fn all_workers(&self) -> Vec<Worker> {
        self.state.lock().workers.clone()
    }

    /// Spawn an idle worker, or `None` when the pool is at `max_workers`
    pub async fn spawn(&self) -> Result<Option<Worker>> {
        self.spawn_as(WorkerState::Idle).await
    }

    /// Assign a worker: first idle one, else a new one if under the bound
    ///
    /// The returned worker is already marked busy.
    pub async fn acquire(&self) -> Result<Option<Worker>> {
        if let Some(worker) = self.take_idle() {
            return Ok(Some(worker));
        }
        self.spawn_as(WorkerState::Busy).await
    }

    /// Mark the first idle worker busy and return it
    pub fn take_idle(&self) -> Option<Worker> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let worker = state
            .workers
            .iter_mut()
            .find(|worker| worker.state == WorkerState::Idle)?;

        worker.state = WorkerState::Busy;
        worker.busy_since_ms = Some(now);
        debug!(worker_id = %worker.id, "Assigned idle worker");
        Some(worker.clone())
    }

    async fn spawn_as(&self, initial: WorkerState) -> Result<Option<Worker>> {
        let (id, slot) = {
            let mut state = self.state.lock();
            if state.workers.len() + state.spawning >= self.max_workers {
                return Ok(None);
            }
            state.spawning += 1;
            let id = format!("worker-{}", state.next_id);
            state.next_id += 1;
            (
                id,
                SpawnSlot {
                    state: &self.state,
                    held: true,
                },
            )
        };

        let config = SpawnConfig {
            id: id.clone(),
            timeout_ms: self.limits.worker_timeout_ms,
            memory_limit_mb: self.limits.memory_limit_mb,
        };

        let handle = match self.factory.spawn(&config).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(worker_id = %id, "Failed to spawn worker: {}", e);
                return Err(e);
            }
        };

        let now = self.clock.now_ms();
        let worker = Worker {
            id,
            state: initial,
            handle,
            spawned_at_ms: now,
            busy_since_ms: (initial != WorkerState::Idle).then_some(now),
            requests_served: 0,
            retired: CancellationToken::new(),
        };
        info!(worker_id = %worker.id, pid = ?worker.handle.pid(), "Spawned worker");
        slot.fill(worker.clone());
        Ok(Some(worker))
    }

    /// Return a worker after an execution, recycling it if it hit a limit
    pub async fn check_in(&self, worker_id: &str) -> CheckIn {
        let (handle, served) = {
            let mut state = self.state.lock();
            let Some(worker) = state.workers.iter_mut().find(|w| w.id == worker_id) else {
                return CheckIn::Unknown;
            };
            if worker.state == WorkerState::Stuck {
                info!(worker_id, "Stuck worker completed, recovering");
            }
            worker.requests_served += 1;
            (Arc::clone(&worker.handle), worker.requests_served)
        };

        let reason = if self.limits.exhausted(served) {
            Some(format!("served {} requests", served))
        } else {
            let usage = handle.memory_usage_mb().await;
            self.limits
                .over_memory(usage)
                .then(|| format!("memory usage {}MB over limit", usage.unwrap_or_default()))
        };

        if let Some(reason) = reason {
            info!(worker_id, %reason, "Recycling worker");
            self.kill(worker_id).await;
            return CheckIn::Recycled(reason);
        }

        let mut state = self.state.lock();
        match state.workers.iter_mut().find(|w| w.id == worker_id) {
            Some(worker) => {
                worker.state = WorkerState::Idle;
                worker.busy_since_ms = None;
                CheckIn::Returned
            }
            None => CheckIn::Unknown,
        }
    }

    /// Mark workers busy for at least `threshold_ms` as stuck
    ///
    /// Returns the IDs that changed state in this sweep.
    pub fn mark_stuck(&self, now_ms: u64, threshold_ms: u64) -> Vec<String> {
        let mut state = self.state.lock();
        state
            .workers
            .iter_mut()
            .filter(|worker| worker.state == WorkerState::Busy)
            .filter(|worker| {
                worker
                    .busy_since_ms
                    .is_some_and(|since| now_ms.saturating_sub(since) >= threshold_ms)
            })
            .map(|worker| {
                worker.state = WorkerState::Stuck;
                worker.id.clone()
            })
            .collect()
    }

    /// IDs of workers currently marked stuck
    pub fn stuck_workers(&self) -> Vec<String> {
        self.state
            .lock()
            .workers
            .iter()
            .filter(|worker| worker.state == WorkerState::Stuck)
            .map(|worker| worker.id.clone())
            .collect()
    }

    /// Kill and unregister a worker; unknown IDs are ignored
    pub async fn kill(&self, worker_id: &str) -> bool {
        let removed = {
            let mut state = self.state.lock();
            state
                .workers
                .iter()
                .position(|worker| worker.id == worker_id)
                .map(|index| state.workers.remove(index))
        };

        let Some(worker) = removed else {
            debug!(worker_id, "Kill requested for unknown worker");
            return false;
        };

        worker.retired.cancel();
        if let Err(e) = worker.handle.kill().await {
            warn!(worker_id, "Failed to kill worker cleanly: {}", e);
        }
        debug!(worker_id, "Worker killed");
        true
    }

    /// Kill every registered worker, returning how many were killed
    pub async fn kill_all(&self) -> usize {
        let workers = std::mem::take(&mut self.state.lock().workers);
        let count = workers.len();

        futures::future::join_all(workers.iter().map(|worker| async move {
            worker.retired.cancel();
            if let Err(e) = worker.handle.kill().await {
                warn!(worker_id = %worker.id, "Failed to kill worker cleanly: {}", e);
            }
        }))
        .await;

        if count > 0 {
            info!("Killed {} workers", count);
        }
        count
    }

    pub fn counts(&self) -> WorkerCounts {
        let state = self.state.lock();
        state
            .workers
            .iter()
            .fold(WorkerCounts::default(), |mut counts, worker| {
                match worker.state {
                    WorkerState::Idle => counts.idle += 1,
                    WorkerState::Busy => counts.busy += 1,
                    WorkerState::Stuck => counts.stuck += 1,
                }
                counts
            })
    }

    pub fn len(&self) -> usize {
        self.state.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}
