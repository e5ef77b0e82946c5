// packages/engine/src/runtime/admission.rs
//! Admission control (backpressure)
//!
//! A pure function of the current [`PoolMetrics`] and [`PoolConfig`]. Three
//! load dimensions are considered:
//!
//! | Dimension | Ratio | Rejects when |
//! |-----------|-------|--------------|
//! | queue     | `queue_depth / max_queue_size` | ratio > `queue_ceiling` |
//! | stuck     | `stuck_workers / max_workers`  | ratio > `stuck_ceiling` |
//! | latency   | `p99 / latency_slo_ms`         | ratio > `latency_ceiling` |
//!
//! The continuous level is the weighted mean of the three ratios, each
//! clamped to `[0, 1]`. A level at or above `reject_level` rejects outright;
//! between `shed_start_level` and `reject_level` the pool sheds a growing
//! share of submissions.

use crate::runtime::pool_config::PoolConfig;
use crate::runtime::types::PoolMetrics;
use crate::utils::errors::{BackpressureReason, EngineError, Result};
use serde::{Deserialize, Serialize};

/// Backpressure thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Queue occupancy ratio above which submissions are refused
    pub queue_ceiling: f64,

    /// Stuck-worker ratio above which submissions are refused
    pub stuck_ceiling: f64,

    /// p99 latency objective; `None` disables the latency dimension
    pub latency_slo_ms: Option<u64>,

    /// `p99 / latency_slo_ms` above which submissions are refused
    pub latency_ceiling: f64,

    pub queue_weight: f64,
    pub stuck_weight: f64,
    pub latency_weight: f64,

    /// Level at which every submission is refused
    pub reject_level: f64,

    /// Level at which probabilistic shedding starts; `None` disables it
    pub shed_start_level: Option<f64>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            queue_ceiling: 1.0,
            stuck_ceiling: 0.5,
            latency_slo_ms: Some(60_000),
            latency_ceiling: 1.0,
            queue_weight: 0.5,
            stuck_weight: 0.3,
            latency_weight: 0.2,
            reject_level: 0.7,
            shed_start_level: None,
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [self.queue_weight, self.stuck_weight, self.latency_weight];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(EngineError::InvalidConfig(
                "backpressure weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "at least one backpressure weight must be positive".to_string(),
            ));
        }
        if self.reject_level <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "reject_level must be positive".to_string(),
            ));
        }
        if let Some(start) = self.shed_start_level {
            if !(0.0..self.reject_level).contains(&start) {
                return Err(EngineError::InvalidConfig(
                    "shed_start_level must be in [0, reject_level)".to_string(),
                ));
            }
        }
        if self.latency_slo_ms == Some(0) {
            return Err(EngineError::InvalidConfig(
                "latency_slo_ms cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Raw load ratios (unclamped)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadRatios {
    pub queue: f64,
    pub stuck: f64,
    pub latency: f64,
}

/// Stateless admission policy
pub struct AdmissionControl;

impl AdmissionControl {
    pub fn ratios(metrics: &PoolMetrics, config: &PoolConfig) -> LoadRatios {
        let ratio = |value: f64, bound: f64| if bound > 0.0 { value / bound } else { 0.0 };

        LoadRatios {
            queue: ratio(metrics.queue_depth as f64, config.max_queue_size as f64),
            stuck: ratio(metrics.stuck_workers as f64, config.max_workers as f64),
            latency: config
                .admission
                .latency_slo_ms
                .map(|slo| ratio(metrics.p99_latency_ms as f64, slo as f64))
                .unwrap_or(0.0),
        }
    }

    /// Continuous backpressure signal in `[0, 1]`
    pub fn level(metrics: &PoolMetrics, config: &PoolConfig) -> f64 {
        let ratios = Self::ratios(metrics, config);
        let admission = &config.admission;

        let weighted = [
            (ratios.queue, admission.queue_weight),
            (ratios.stuck, admission.stuck_weight),
            (ratios.latency, admission.latency_weight),
        ];
        let total_weight: f64 = weighted.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }

        weighted
            .iter()
            .map(|(ratio, weight)| ratio.clamp(0.0, 1.0) * weight)
            .sum::<f64>()
            / total_weight
    }

    /// Decide whether to admit, naming the constraint that refused otherwise
    pub fn evaluate(
        metrics: &PoolMetrics,
        config: &PoolConfig,
    ) -> std::result::Result<(), BackpressureReason> {
        let ratios = Self::ratios(metrics, config);
        let admission = &config.admission;

        if ratios.queue > admission.queue_ceiling {
            return Err(BackpressureReason::QueueSaturated {
                ratio: ratios.queue,
                ceiling: admission.queue_ceiling,
            });
        }
        if ratios.stuck > admission.stuck_ceiling {
            return Err(BackpressureReason::StuckWorkers {
                ratio: ratios.stuck,
                ceiling: admission.stuck_ceiling,
            });
        }
        if let Some(slo_ms) = admission.latency_slo_ms {
            if ratios.latency > admission.latency_ceiling {
                return Err(BackpressureReason::LatencySlo {
                    p99_ms: metrics.p99_latency_ms,
                    slo_ms,
                });
            }
        }

        let level = Self::level(metrics, config);
        if level >= admission.reject_level {
            return Err(BackpressureReason::Overloaded { level });
        }
        Ok(())
    }

    pub fn should_reject(metrics: &PoolMetrics, config: &PoolConfig) -> bool {
        Self::evaluate(metrics, config).is_err()
    }

    /// Probability of shedding a submission at `level`
    pub fn shed_probability(level: f64, config: &PoolConfig) -> f64 {
        let admission = &config.admission;
        match admission.shed_start_level {
            Some(start) if level >= start => {
                let span = admission.reject_level - start;
                if span <= 0.0 {
                    1.0
                } else {
                    ((level - start) / span).clamp(0.0, 1.0)
                }
            }
            _ => 0.0,
        }
    }
}
