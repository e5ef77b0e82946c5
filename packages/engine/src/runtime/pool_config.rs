// packages/engine/src/runtime/pool_config.rs
//! Worker pool configuration

use crate::runtime::admission::AdmissionConfig;
use crate::runtime::worker_limits::WorkerLimits;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the worker pool
///
/// Loaded once at construction and immutable for the pool's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Admitted-but-unfinished entries the scheduler may hold (default: 32)
    pub max_queue_size: usize,

    /// Upper bound on live workers, stuck ones included (default: 4)
    pub max_workers: usize,

    /// Workers spawned eagerly at start (default: 1)
    pub min_workers: usize,

    /// Per-worker resource limits
    pub limits: WorkerLimits,

    /// Backpressure thresholds
    pub admission: AdmissionConfig,

    /// Liveness sweep interval in milliseconds (default: 5s)
    pub heartbeat_interval_ms: u64,

    /// Busy time after which a worker is considered stuck (default: 60s)
    pub stuck_threshold_ms: u64,

    /// Kill stuck workers instead of only excluding them from assignment
    pub reap_stuck_workers: bool,

    /// Latency samples retained for percentile computation (default: 1024)
    pub latency_window_size: usize,

    /// Longest graceful drain before shutdown cancels in-flight work (default: 30s)
    pub drain_timeout_ms: u64,

    /// Poll interval while draining or waiting on a withdrawn entry (default: 50ms)
    pub drain_poll_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 32,
            max_workers: 4,
            min_workers: 1,
            limits: WorkerLimits::default(),
            admission: AdmissionConfig::default(),
            heartbeat_interval_ms: 5_000,
            stuck_threshold_ms: 60_000,
            reap_stuck_workers: false,
            latency_window_size: 1024,
            drain_timeout_ms: 30_000,
            drain_poll_interval_ms: 50,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(EngineError::InvalidConfig(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(EngineError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(EngineError::InvalidConfig(format!(
                "min_workers ({}) cannot exceed max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.heartbeat_interval_ms == 0 || self.drain_poll_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "heartbeat and drain poll intervals must be positive".to_string(),
            ));
        }
        if self.latency_window_size == 0 {
            return Err(EngineError::InvalidConfig(
                "latency_window_size must be at least 1".to_string(),
            ));
        }

        self.limits.validate()?;
        self.admission.validate()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_queue_size, 32);
        assert_eq!(config.limits.worker_timeout_ms, 120_000);
        assert_eq!(config.admission.reject_level, 0.7);
        assert_eq!(config.heartbeat_interval_ms, 5_000);
        assert_eq!(config.stuck_threshold_ms, 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_worker_bounds() {
        let config = PoolConfig {
            min_workers: 5,
            max_workers: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_queue() {
        let config = PoolConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_sections_deserialize() {
        let config: PoolConfig = serde_json::from_value(serde_json::json!({
            "max_workers": 8,
            "limits": { "memory_limit_mb": 1024 },
            "admission": { "reject_level": 0.9 }
        }))
        .unwrap();

        assert_eq!(config.max_workers, 8);
        assert_eq!(config.limits.memory_limit_mb, Some(1024));
        assert_eq!(config.limits.max_requests_per_worker, Some(100));
        assert_eq!(config.admission.reject_level, 0.9);
        assert_eq!(config.admission.stuck_ceiling, 0.5);
    }
}
