// packages/engine/src/lib.rs
//! Gateway Engine Library
//!
//! Worker-pool concurrency engine for a multi-channel agent gateway. Message
//! handlers submit work; the engine bounds concurrency, serializes each
//! conversation, applies backpressure and reports pool health.
//!
//! # Architecture
//!
//! The engine is structured into three modules:
//!
//! - **runtime**: Scheduler, session locks, worker registry, admission
//!   control and the pool orchestrator
//! - **observability**: Tracing setup and Prometheus metrics export
//! - **utils**: Errors, configuration and clocks

// Public module exports
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use runtime::pool::{ShutdownReport, WorkerPool};
pub use runtime::pool_config::PoolConfig;
pub use runtime::types::{PoolMetrics, Priority, WorkRequest, WorkResponse};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, PoolError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
        assert!(!info.git_hash.is_empty());
    }
}
