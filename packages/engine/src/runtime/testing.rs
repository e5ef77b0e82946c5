// packages/engine/src/runtime/testing.rs
//! In-memory worker factory for tests
//!
//! Payload fields steer the fake worker:
//! - `label`: recorded in the execution log
//! - `sleep_ms`: execution time (use paused tokio time)
//! - `fail`: return an error instead of a result
//! - `hang`: never finish unless cancelled
//! - `ignore_cancel`: keep running after the cancel token fires

use crate::runtime::worker::{SpawnConfig, WorkerFactory, WorkerHandle};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Started(String),
    Finished(String),
}

#[derive(Default)]
struct FakeState {
    spawned: AtomicUsize,
    fail_spawns: AtomicBool,
    fail_kills: AtomicBool,
    memory_usage_mb: Mutex<Option<u64>>,
    spawn_delay: Mutex<Option<Duration>>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    spawn_configs: Mutex<Vec<SpawnConfig>>,
    killed: Mutex<Vec<String>>,
    log: Mutex<Vec<ExecEvent>>,
}

impl FakeState {
    fn start_running(&self) -> Running<'_> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        Running(self)
    }
}

/// Counts an execution as running until dropped
struct Running<'a>(&'a FakeState);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    state: Arc<FakeState>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawned(&self) -> usize {
        self.state.spawned.load(Ordering::SeqCst)
    }

    pub fn spawn_configs(&self) -> Vec<SpawnConfig> {
        self.state.spawn_configs.lock().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.killed.lock().clone()
    }

    pub fn log(&self) -> Vec<ExecEvent> {
        self.state.log.lock().clone()
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.state.fail_spawns.store(fail, Ordering::SeqCst);
    }

    pub fn fail_kills(&self, fail: bool) {
        self.state.fail_kills.store(fail, Ordering::SeqCst);
    }

    pub fn set_memory_usage_mb(&self, usage: Option<u64>) {
        *self.state.memory_usage_mb.lock() = usage;
    }

    pub fn set_spawn_delay(&self, delay: Option<Duration>) {
        *self.state.spawn_delay.lock() = delay;
    }

    /// Most executions ever running at the same time
    pub fn peak_running(&self) -> usize {
        self.state.peak_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerFactory for FakeFactory {
    async fn spawn(&self, config: &SpawnConfig) -> Result<Arc<dyn WorkerHandle>> {
        let delay = *self.state.spawn_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_spawns.load(Ordering::SeqCst) {
            return Err(EngineError::ProcessSpawnFailed("spawn failed".to_string()));
        }
        self.state.spawned.fetch_add(1, Ordering::SeqCst);
        self.state.spawn_configs.lock().push(config.clone());

        Ok(Arc::new(FakeWorker {
            id: config.id.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeWorker {
    id: String,
    state: Arc<FakeState>,
}

#[async_trait]
impl WorkerHandle for FakeWorker {
    async fn execute(&self, payload: Value, cancel: CancellationToken) -> Result<Value> {
        let label = payload["label"].as_str().unwrap_or_default().to_string();
        self.state.log.lock().push(ExecEvent::Started(label.clone()));
        let _running = self.state.start_running();

        let work = async {
            if payload["hang"].as_bool().unwrap_or(false) {
                std::future::pending::<()>().await;
            }
            if let Some(ms) = payload["sleep_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        };

        if payload["ignore_cancel"].as_bool().unwrap_or(false) {
            work.await;
        } else {
            tokio::select! {
                _ = work => {}
                _ = cancel.cancelled() => {
                    self.state.log.lock().push(ExecEvent::Finished(label));
                    return Err(EngineError::Cancelled);
                }
            }
        }

        self.state.log.lock().push(ExecEvent::Finished(label));
        if payload["fail"].as_bool().unwrap_or(false) {
            return Err(EngineError::RuntimeError("worker failed".to_string()));
        }
        Ok(json!({ "success": true, "worker": self.id }))
    }

    async fn memory_usage_mb(&self) -> Option<u64> {
        *self.state.memory_usage_mb.lock()
    }

    async fn kill(&self) -> Result<()> {
        self.state.killed.lock().push(self.id.clone());
        if self.state.fail_kills.load(Ordering::SeqCst) {
            return Err(EngineError::RuntimeError("already dead".to_string()));
        }
        Ok(())
    }
}
