// packages/engine/src/observability/mod.rs
//! Logging and metrics export
//!
//! - **Tracing**: `tracing-subscriber` with an env filter and a pretty or
//!   JSON formatter
//! - **Metrics**: pool instruments recorded through the `metrics` facade,
//!   exported in Prometheus format when a listen address is configured

use crate::utils::config::{LogFormat, ObservabilityConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Metric names recorded by the worker pool
pub mod names {
    pub const SUBMITTED_TOTAL: &str = "gateway_pool_submitted_total";
    pub const REJECTED_TOTAL: &str = "gateway_pool_rejected_total";
    pub const PROCESSED_TOTAL: &str = "gateway_pool_processed_total";
    pub const ERRORS_TOTAL: &str = "gateway_pool_errors_total";
    pub const QUEUE_DEPTH: &str = "gateway_pool_queue_depth";
    pub const WORKERS: &str = "gateway_pool_workers";
    pub const BACKPRESSURE_LEVEL: &str = "gateway_pool_backpressure_level";
    pub const LATENCY_MS: &str = "gateway_pool_latency_ms";
    pub const WORKERS_RECYCLED_TOTAL: &str = "gateway_pool_workers_recycled_total";
    pub const WORKERS_STUCK_TOTAL: &str = "gateway_pool_workers_stuck_total";
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| EngineError::InvalidConfig(format!("invalid log level: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| EngineError::RuntimeError(format!("tracing init failed: {}", e)))
}

/// Install the Prometheus exporter on `addr`
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::RuntimeError(format!("metrics exporter failed: {}", e)))?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}
