// packages/engine/src/utils/errors.rs
//! Error types for the engine
//!
//! Two layers:
//!
//! - [`EngineError`]: infrastructure failures (config, process spawning,
//!   worker I/O). Used below the pool boundary.
//! - [`PoolError`]: the caller-facing taxonomy returned by
//!   [`WorkerPool::submit`](crate::runtime::pool::WorkerPool::submit). Every
//!   variant carries enough detail to decide between retry, back-off and
//!   giving up.

use serde::Serialize;
use thiserror::Error;

/// Result alias for engine-internal operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Infrastructure errors raised by workers, factories and configuration
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker process: {0}")]
    ProcessSpawnFailed(String),

    #[error("worker runtime error: {0}")]
    RuntimeError(String),

    #[error("worker {0} exited before replying")]
    WorkerExited(String),

    #[error("execution timed out after {0}ms")]
    ExecutionTimeout(u64),

    #[error("execution cancelled")]
    Cancelled,

    #[error("malformed worker message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a submission was refused for capacity reasons
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueFullReason {
    /// The bounded scheduler queue is at `max_queue_size`
    Capacity { max_queue_size: usize },

    /// Another request for the same session held the lock past the timeout
    SessionBusy { session_id: String, waited_ms: u64 },
}

/// Why admission control refused a submission
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackpressureReason {
    /// `shutdown()` has been called
    ShuttingDown,

    /// Queue occupancy ratio exceeded its ceiling
    QueueSaturated { ratio: f64, ceiling: f64 },

    /// Too many workers are stuck
    StuckWorkers { ratio: f64, ceiling: f64 },

    /// Recent p99 latency is over the configured SLO
    LatencySlo { p99_ms: u64, slo_ms: u64 },

    /// Composite backpressure level reached the reject level
    Overloaded { level: f64 },

    /// Probabilistic shedding between the shed and reject levels
    LoadShed { level: f64 },
}

impl std::fmt::Display for QueueFullReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capacity { max_queue_size } => {
                write!(f, "queue is full ({} entries)", max_queue_size)
            }
            Self::SessionBusy { session_id, waited_ms } => write!(
                f,
                "session '{}' is busy: lock not acquired within {}ms",
                session_id, waited_ms
            ),
        }
    }
}

impl std::fmt::Display for BackpressureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShuttingDown => write!(f, "pool is shutting down"),
            Self::QueueSaturated { ratio, ceiling } => write!(
                f,
                "high load: queue at {:.0}% (ceiling {:.0}%)",
                ratio * 100.0,
                ceiling * 100.0
            ),
            Self::StuckWorkers { ratio, ceiling } => write!(
                f,
                "high load: {:.0}% of workers stuck (ceiling {:.0}%)",
                ratio * 100.0,
                ceiling * 100.0
            ),
            Self::LatencySlo { p99_ms, slo_ms } => write!(
                f,
                "high load: p99 latency {}ms over SLO {}ms",
                p99_ms, slo_ms
            ),
            Self::Overloaded { level } => {
                write!(f, "high load: backpressure level {:.2}", level)
            }
            Self::LoadShed { level } => {
                write!(f, "high load: request shed at backpressure level {:.2}", level)
            }
        }
    }
}

/// Errors returned to callers of `submit`
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum PoolError {
    /// Capacity exhausted: the bounded queue or session-lock contention
    #[error("queue full: {reason}")]
    QueueFull { reason: QueueFullReason },

    /// The pool is shedding load or shutting down
    #[error("backpressure: {reason}")]
    Backpressure { reason: BackpressureReason },

    /// No worker could be assigned to the request
    #[error("no worker assigned to request {request_id}: {reason}")]
    WorkerTimeout { request_id: String, reason: String },

    /// The request was assigned and its execution failed
    #[error("execution of request {request_id} failed: {message}")]
    ExecutionFailed { request_id: String, message: String },
}

/// Coarse error category, used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    QueueFull,
    Backpressure,
    WorkerTimeout,
    ExecutionFailed,
}

impl PoolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Backpressure => "backpressure",
            Self::WorkerTimeout => "worker_timeout",
            Self::ExecutionFailed => "execution_failed",
        }
    }
}

impl PoolError {
    pub fn kind(&self) -> PoolErrorKind {
        match self {
            Self::QueueFull { .. } => PoolErrorKind::QueueFull,
            Self::Backpressure { .. } => PoolErrorKind::Backpressure,
            Self::WorkerTimeout { .. } => PoolErrorKind::WorkerTimeout,
            Self::ExecutionFailed { .. } => PoolErrorKind::ExecutionFailed,
        }
    }

    /// Whether retrying the same request later can succeed.
    ///
    /// Only a pool that is shutting down is a permanent refusal.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Backpressure {
                reason: BackpressureReason::ShuttingDown
            }
        )
    }

    pub(crate) fn queue_full(reason: QueueFullReason) -> Self {
        Self::QueueFull { reason }
    }

    pub(crate) fn backpressure(reason: BackpressureReason) -> Self {
        Self::Backpressure { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutting_down_message() {
        let err = PoolError::backpressure(BackpressureReason::ShuttingDown);
        assert!(err.to_string().contains("shutting down"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_overload_message_mentions_high_load() {
        let err = PoolError::backpressure(BackpressureReason::Overloaded { level: 0.82 });
        assert!(err.to_string().contains("high load"));
        assert!(err.is_retryable());
        assert_eq!(err.kind().as_str(), "backpressure");
    }

    #[test]
    fn test_session_busy_carries_session() {
        let err = PoolError::queue_full(QueueFullReason::SessionBusy {
            session_id: "chat-7".to_string(),
            waited_ms: 250,
        });
        let message = err.to_string();
        assert!(message.contains("chat-7"));
        assert!(message.contains("250ms"));
        assert_eq!(err.kind(), PoolErrorKind::QueueFull);
    }

    #[test]
    fn test_serializes_with_tag() {
        let err = PoolError::queue_full(QueueFullReason::Capacity { max_queue_size: 2 });
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "queue_full");
        assert_eq!(json["reason"]["kind"], "capacity");
        assert_eq!(json["reason"]["max_queue_size"], 2);
    }
}
