// packages/engine/src/runtime/worker_limits.rs
//! Per-worker resource limits
//!
//! Provides control over:
//! - Execution time (per request, passed to the worker factory)
//! - Memory consumption (MB limit, checked after each execution)
//! - Worker reuse (requests served before the worker is recycled)

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Resource limits applied to every pooled worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerLimits {
    /// Upper bound for one execution, handed to the factory at spawn time
    pub worker_timeout_ms: u64,

    /// Resident memory limit in megabytes
    /// Example: 512 = worker is recycled once it reports more than 512MB
    pub memory_limit_mb: Option<u64>,

    /// Requests a worker may serve before it is replaced
    pub max_requests_per_worker: Option<u64>,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            worker_timeout_ms: 120_000,
            memory_limit_mb: Some(512),
            max_requests_per_worker: Some(100),
        }
    }
}

impl WorkerLimits {
    /// Limits that never recycle a worker
    pub fn unlimited() -> Self {
        Self {
            worker_timeout_ms: 120_000,
            memory_limit_mb: None,
            max_requests_per_worker: None,
        }
    }

    /// Tight limits for untrusted backends
    pub fn strict() -> Self {
        Self {
            worker_timeout_ms: 30_000,
            memory_limit_mb: Some(256),
            max_requests_per_worker: Some(20),
        }
    }

    /// Validate resource limits
    pub fn validate(&self) -> Result<()> {
        if self.worker_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "worker_timeout_ms cannot be 0".to_string(),
            ));
        }

        if let Some(memory) = self.memory_limit_mb {
            if memory < 64 {
                return Err(EngineError::InvalidConfig(
                    "memory_limit_mb cannot be less than 64MB".to_string(),
                ));
            }
            if memory > 16384 {
                return Err(EngineError::InvalidConfig(
                    "memory_limit_mb cannot exceed 16GB".to_string(),
                ));
            }
        }

        if self.max_requests_per_worker == Some(0) {
            return Err(EngineError::InvalidConfig(
                "max_requests_per_worker cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a worker that served `requests_served` requests is worn out
    pub fn exhausted(&self, requests_served: u64) -> bool {
        self.max_requests_per_worker
            .is_some_and(|max| requests_served >= max)
    }

    /// Whether a reported memory usage is over the limit
    pub fn over_memory(&self, usage_mb: Option<u64>) -> bool {
        match (self.memory_limit_mb, usage_mb) {
            (Some(limit), Some(usage)) => usage > limit,
            _ => false,
        }
    }
}
