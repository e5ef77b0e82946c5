// packages/engine/src/runtime/mod.rs
//! Worker pool runtime
//!
//! This module provides the concurrency engine between the gateway's message
//! handlers and the agent backends:
//!
//! - **Pool**: Orchestrates submission, dispatch, metrics and shutdown
//! - **Scheduler**: Bounded priority queue of admitted work
//! - **Session Lock**: One in-flight request per conversation, FIFO waiters
//! - **Worker Registry**: Reusable workers bounded by `max_workers`
//! - **Admission**: Backpressure from queue, stuck-worker and latency load
//! - **Health**: Stuck-worker detection and reaping
//! - **Process Manager**: Subprocess workers speaking JSON over stdio
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Channel handlers (telegram, web, ...)                   │
//! │        │ submit(WorkRequest)                              │
//! │        ▼                                                  │
//! │  AdmissionControl ──► SessionLock ──► Scheduler           │
//! │                                         │ dispatch        │
//! │                                         ▼                 │
//! │                    WorkerRegistry (max_workers)           │
//! │          ┌──────────┐  ┌──────────┐  ┌──────────┐        │
//! │          │ worker-0 │  │ worker-1 │  │ worker-2 │  ...   │
//! │          └──────────┘  └──────────┘  └──────────┘        │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod admission;
pub mod health;
pub mod latency;
pub mod pool;
pub mod pool_config;
pub mod process_manager;
pub mod scheduler;
pub mod session_lock;
pub mod types;
pub mod worker;
pub mod worker_limits;
pub mod worker_registry;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use admission::{AdmissionConfig, AdmissionControl};
pub use health::HealthReport;
pub use pool::{ShutdownReport, WorkerPool};
pub use pool_config::PoolConfig;
pub use process_manager::{ProcessWorkerFactory, WorkerProcessConfig};
pub use scheduler::{QueueFullError, Scheduler, SchedulerStats};
pub use session_lock::{LockTimeoutError, SessionLock, SessionToken};
pub use types::{PoolMetrics, Priority, QueueEntry, WorkRequest, WorkResponse};
pub use worker::{SpawnConfig, Worker, WorkerFactory, WorkerHandle, WorkerState};
pub use worker_limits::WorkerLimits;
pub use worker_registry::{WorkerCounts, WorkerRegistry};
