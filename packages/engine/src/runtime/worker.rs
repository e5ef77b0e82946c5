// packages/engine/src/runtime/worker.rs
//! Worker capability seams
//!
//! The pool never knows how a payload is executed. It asks a
//! [`WorkerFactory`] for workers and drives each through its
//! [`WorkerHandle`]. The subprocess implementation lives in
//! [`process_manager`](crate::runtime::process_manager); tests inject fakes.

use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parameters handed to the factory for each new worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Pool-assigned worker ID (`worker-0`, `worker-1`, ...)
    pub id: String,

    /// Upper bound for a single execution
    pub timeout_ms: u64,

    /// Memory limit the backend should enforce, if any
    pub memory_limit_mb: Option<u64>,
}

/// Execution capability of one live worker
#[async_trait]
pub trait WorkerHandle: Send + Sync + 'static {
    /// Run one payload to completion
    ///
    /// Implementations should return promptly with
    /// [`EngineError::Cancelled`](crate::utils::errors::EngineError::Cancelled)
    /// once `cancel` fires.
    async fn execute(
        &self,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value>;

    /// Resident memory of the worker in megabytes, when known
    async fn memory_usage_mb(&self) -> Option<u64> {
        None
    }

    /// Terminate the worker; must tolerate an already-dead worker
    async fn kill(&self) -> Result<()>;

    /// OS process ID, for workers backed by a process
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Creates workers on demand
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    async fn spawn(&self, config: &SpawnConfig) -> Result<Arc<dyn WorkerHandle>>;
}

/// Lifecycle state of a pooled worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
    Stuck,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Stuck => "stuck",
        }
    }
}

/// A pooled worker as tracked by the registry
#[derive(Clone)]
pub struct Worker {
    pub id: String,
    pub state: WorkerState,
    pub handle: Arc<dyn WorkerHandle>,
    pub spawned_at_ms: u64,

    /// Set while busy or stuck
    pub busy_since_ms: Option<u64>,

    /// Executions completed on this worker
    pub requests_served: u64,

    /// Fires when the registry kills the worker; aborts its execution
    pub retired: CancellationToken,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pid", &self.handle.pid())
            .field("spawned_at_ms", &self.spawned_at_ms)
            .field("busy_since_ms", &self.busy_since_ms)
            .field("requests_served", &self.requests_served)
            .finish()
    }
}
