// packages/engine/src/runtime/types.rs
//! Request, queue entry and response types shared by the pool components

use serde::{Deserialize, Serialize};

/// Request priority (higher = dequeued first)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// A unit of work submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    /// Caller-chosen request ID, echoed in the response
    pub id: String,

    /// Requests sharing a session are executed one at a time, in order
    pub session_id: String,

    /// Tenant the request belongs to (e.g. `telegram:user1:chat1`)
    pub tenant_id: String,

    #[serde(default)]
    pub priority: Priority,

    /// Bound for lock wait, worker assignment and execution, each
    pub timeout_ms: u64,

    /// Opaque payload handed to the worker
    pub payload: serde_json::Value,
}

impl WorkRequest {
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            tenant_id: String::new(),
            priority: Priority::Normal,
            timeout_ms: 30_000,
            payload,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// The scheduler's representation of an admitted request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub id: String,

    /// Pool-assigned ticket; unique per pool and increasing in admission order
    pub seq: u64,

    pub tenant_id: String,
    pub priority: Priority,
    pub enqueued_at_ms: u64,
    pub timeout_ms: u64,
    pub payload: serde_json::Value,
}

impl QueueEntry {
    pub fn from_request(request: WorkRequest, seq: u64, now_ms: u64) -> Self {
        Self {
            id: request.id,
            seq,
            tenant_id: request.tenant_id,
            priority: request.priority,
            enqueued_at_ms: now_ms,
            timeout_ms: request.timeout_ms,
            payload: request.payload,
        }
    }
}

/// Result of a completed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResponse {
    pub request_id: String,
    pub result: serde_json::Value,
    pub processing_time_ms: u64,
    pub worker_id: String,
}

/// Point-in-time view of the pool, recomputed on every call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolMetrics {
    /// Workers currently executing
    pub active_workers: usize,
    pub idle_workers: usize,
    pub stuck_workers: usize,

    /// Admitted entries not yet finished (waiting + executing)
    pub queue_depth: usize,

    pub total_processed: u64,
    pub total_errors: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,

    /// Completions in the trailing 60 seconds
    pub throughput_per_minute: u64,

    /// Composite load signal in `[0, 1]`
    pub backpressure_level: f64,
}
