// packages/engine/src/runtime/health.rs
//! Worker liveness policy
//!
//! A worker that stays busy past `stuck_threshold_ms` is marked stuck: it
//! keeps counting against `max_workers` but is no longer assignable. With
//! reaping enabled the sweep also kills it, freeing the slot for a fresh
//! worker.

use crate::runtime::worker_registry::WorkerRegistry;
use tracing::warn;

/// Outcome of one liveness sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Workers marked stuck by this sweep
    pub newly_stuck: Vec<String>,

    /// Stuck workers killed by this sweep
    pub reaped: Vec<String>,
}

/// Stuck-worker detection policy
#[derive(Debug, Clone)]
pub struct WorkerHealth {
    stuck_threshold_ms: u64,
    reap_stuck: bool,
}

impl WorkerHealth {
    pub fn new(stuck_threshold_ms: u64, reap_stuck: bool) -> Self {
        Self {
            stuck_threshold_ms,
            reap_stuck,
        }
    }

    /// Mark (and optionally kill) workers busy for too long
    pub async fn sweep(&self, registry: &WorkerRegistry, now_ms: u64) -> HealthReport {
        let newly_stuck = registry.mark_stuck(now_ms, self.stuck_threshold_ms);
        for worker_id in &newly_stuck {
            warn!(
                worker_id = %worker_id,
                threshold_ms = self.stuck_threshold_ms,
                "Worker busy past liveness threshold, marked stuck"
            );
        }

        let mut reaped = Vec::new();
        if self.reap_stuck {
            for worker_id in registry.stuck_workers() {
                if registry.kill(&worker_id).await {
                    warn!(worker_id = %worker_id, "Reaped stuck worker");
                    reaped.push(worker_id);
                }
            }
        }

        HealthReport {
            newly_stuck,
            reaped,
        }
    }
}
