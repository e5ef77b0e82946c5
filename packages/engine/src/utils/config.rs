// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML file: `$GATEWAY_ENGINE_CONFIG`, else `gateway-engine.toml` (optional)
//! 3. Environment variables `GATEWAY_ENGINE__<SECTION>__<KEY>`,
//!    e.g. `GATEWAY_ENGINE__POOL__MAX_WORKERS=8`

use crate::runtime::pool_config::PoolConfig;
use crate::runtime::process_manager::WorkerProcessConfig;
use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

const CONFIG_PATH_VAR: &str = "GATEWAY_ENGINE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "gateway-engine.toml";
const ENV_PREFIX: &str = "GATEWAY_ENGINE";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub worker: WorkerProcessConfig,
    pub observability: ObservabilityConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub log_level: String,
    pub log_format: LogFormat,

    /// Prometheus listen address; metrics stay in-process when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load from the default file location and the environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(path)
    }

    /// Load from `path` (if it exists) and the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: EngineConfig = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if self.worker.command.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "worker.command cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = EngineConfig::load_from("/nonexistent/gateway-engine.toml").unwrap();
        assert_eq!(config.pool.max_workers, PoolConfig::default().max_workers);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.worker.command, "cat");
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [pool]
            max_workers = 8
            min_workers = 2
            stuck_threshold_ms = 30000

            [pool.limits]
            memory_limit_mb = 1024

            [pool.admission]
            latency_slo_ms = 5000

            [worker]
            command = "python3"
            args = ["-u", "agent.py"]

            [worker.env]
            agent_mode = "gateway"

            [observability]
            log_format = "json"
            metrics_addr = "127.0.0.1:9100"
            "#,
        );

        let config = EngineConfig::load_from(file.path()).unwrap();
        assert_eq!(config.pool.max_workers, 8);
        assert_eq!(config.pool.min_workers, 2);
        assert_eq!(config.pool.stuck_threshold_ms, 30_000);
        assert_eq!(config.pool.limits.memory_limit_mb, Some(1024));
        assert_eq!(config.pool.limits.max_requests_per_worker, Some(100));
        assert_eq!(config.pool.admission.latency_slo_ms, Some(5_000));
        assert_eq!(config.worker.command, "python3");
        assert_eq!(config.worker.args, vec!["-u", "agent.py"]);
        assert_eq!(config.worker.env["agent_mode"], "gateway");
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(
            config.observability.metrics_addr,
            Some("127.0.0.1:9100".parse().unwrap())
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let file = write_config(
            r#"
            [pool]
            max_workers = 2
            min_workers = 4
            "#,
        );
        assert!(matches!(
            EngineConfig::load_from(file.path()),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config(
            r#"
            [pool]
            heartbeat_interval_ms = 1000
            "#,
        );
        std::env::set_var("GATEWAY_ENGINE__POOL__HEARTBEAT_INTERVAL_MS", "2500");
        let config = EngineConfig::load_from(file.path());
        std::env::remove_var("GATEWAY_ENGINE__POOL__HEARTBEAT_INTERVAL_MS");

        assert_eq!(config.unwrap().pool.heartbeat_interval_ms, 2_500);
    }
}
