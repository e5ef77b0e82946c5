// packages/engine/src/runtime/process_manager.rs
//! Subprocess-backed workers
//!
//! Each worker is a long-lived child process speaking newline-delimited JSON
//! over stdio, one request at a time:
//!
//! ```text
//! stdin  ◄── {"id": 7, "payload": {...}}
//! stdout ──► {"id": 7, "result": {...}}   or   {"id": 7, "error": "..."}
//! ```
//!
//! A reply carrying neither `result` nor `error` is returned as-is. Worker
//! stderr is forwarded to the log. Termination sends SIGTERM, then SIGKILL
//! once the grace period expires.

use crate::runtime::worker::{SpawnConfig, WorkerFactory, WorkerHandle};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How worker processes are launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerProcessConfig {
    /// Executable name (looked up in PATH) or path
    pub command: String,

    pub args: Vec<String>,

    /// Extra environment variables
    pub env: HashMap<String, String>,

    /// Working directory
    pub work_dir: Option<String>,

    /// Time between SIGTERM and SIGKILL (default: 2s)
    pub kill_grace_ms: u64,
}

impl Default for WorkerProcessConfig {
    fn default() -> Self {
        Self {
            command: "cat".to_string(),
            args: vec![],
            env: HashMap::new(),
            work_dir: None,
            kill_grace_ms: 2_000,
        }
    }
}

/// Spawns one child process per worker
pub struct ProcessWorkerFactory {
    config: WorkerProcessConfig,
    executable: PathBuf,
}

impl ProcessWorkerFactory {
    /// Resolve the worker executable once, up front
    pub fn new(config: WorkerProcessConfig) -> Result<Self> {
        let executable = which::which(&config.command).map_err(|e| {
            EngineError::ProcessSpawnFailed(format!(
                "Executable '{}' not found in PATH: {}",
                config.command, e
            ))
        })?;
        info!("Found worker executable {} at {:?}", config.command, executable);

        Ok(Self { config, executable })
    }

    pub fn executable(&self) -> &PathBuf {
        &self.executable
    }
}

#[async_trait]
impl WorkerFactory for ProcessWorkerFactory {
    async fn spawn(&self, spawn: &SpawnConfig) -> Result<Arc<dyn WorkerHandle>> {
        let mut command = Command::new(&self.executable);
        command.args(&self.config.args);

        if let Some(work_dir) = &self.config.work_dir {
            command.current_dir(work_dir);
        }
        for (key, value) in &self.config.env {
            command.env(key, value);
        }
        command
            .env("GATEWAY_WORKER_ID", &spawn.id)
            .env("GATEWAY_WORKER_TIMEOUT_MS", spawn.timeout_ms.to_string());
        if let Some(limit) = spawn.memory_limit_mb {
            command.env("GATEWAY_WORKER_MEMORY_LIMIT_MB", limit.to_string());
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            EngineError::ProcessSpawnFailed(format!("Failed to spawn {}: {}", spawn.id, e))
        })?;

        let missing = |stream: &str| {
            EngineError::ProcessSpawnFailed(format!("{} of {} not captured", stream, spawn.id))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(spawn.id.clone(), stderr);
        }

        let pid = child.id();
        debug!(worker_id = %spawn.id, ?pid, "Worker process spawned");

        Ok(Arc::new(ProcessWorker {
            id: spawn.id.clone(),
            pid,
            io: Mutex::new(WorkerIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            child: Mutex::new(child),
            next_request: AtomicU64::new(0),
            kill_grace: Duration::from_millis(self.config.kill_grace_ms),
        }))
    }
}

struct WorkerIo {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// One worker child process
pub struct ProcessWorker {
    id: String,
    pid: Option<u32>,
    io: Mutex<WorkerIo>,
    child: Mutex<Child>,
    next_request: AtomicU64,
    kill_grace: Duration,
}

impl ProcessWorker {
    async fn round_trip(&self, io: &mut WorkerIo, payload: Value) -> Result<Value> {
        let request_id = self.next_request.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_vec(&json!({ "id": request_id, "payload": payload }))?;
        line.push(b'\n');

        io.stdin.write_all(&line).await?;
        io.stdin.flush().await?;

        let reply = io
            .stdout
            .next_line()
            .await?
            .ok_or_else(|| EngineError::WorkerExited(self.id.clone()))?;
        let mut reply: Value = serde_json::from_str(&reply)?;

        if let Some(error) = reply.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(EngineError::RuntimeError(message));
        }
        match reply.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Ok(reply),
        }
    }
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    async fn execute(&self, payload: Value, cancel: CancellationToken) -> Result<Value> {
        let mut io = self.io.lock().await;
        tokio::select! {
            result = self.round_trip(&mut io, payload) => result,
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
        }
    }

    async fn memory_usage_mb(&self) -> Option<u64> {
        resident_memory_mb(self.pid?).await
    }

    async fn kill(&self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let mut child = self.child.lock().await;
        if child.try_wait()?.is_some() {
            debug!(worker_id = %self.id, "Worker process already exited");
            return Ok(());
        }
        let Some(pid) = child.id() else {
            return Ok(());
        };

        debug!(worker_id = %self.id, pid, "Sending SIGTERM");
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // ESRCH: exited between the checks
            if e != nix::errno::Errno::ESRCH {
                return Err(EngineError::RuntimeError(format!(
                    "Failed to send SIGTERM: {}",
                    e
                )));
            }
        }

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(worker_id = %self.id, ?status, "Worker process exited");
            }
            Err(_) => {
                warn!(worker_id = %self.id, pid, "Worker ignored SIGTERM, sending SIGKILL");
                child.kill().await?;
            }
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

fn forward_stderr(worker_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(worker_id = %worker_id, "{}", line);
        }
    });
}

/// Resident set size from `/proc/<pid>/statm`
#[cfg(target_os = "linux")]
async fn resident_memory_mb(pid: u32) -> Option<u64> {
    let statm = tokio::fs::read_to_string(format!("/proc/{}/statm", pid))
        .await
        .ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;

    // SAFETY: sysconf has no preconditions
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(resident_pages * page_size as u64 / (1024 * 1024))
}

#[cfg(not(target_os = "linux"))]
async fn resident_memory_mb(_pid: u32) -> Option<u64> {
    None
}
