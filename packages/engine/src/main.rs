// packages/engine/src/main.rs
//! Gateway Engine
//!
//! Line-oriented driver for the worker pool: each stdin line is a JSON work
//! request, each stdout line the JSON outcome of one request (in completion
//! order). EOF or Ctrl-C drains the pool and exits.
//!
//! ```text
//! {"session_id": "telegram:42", "payload": {"text": "hi"}}
//! ```

use anyhow::{Context, Result};
use gateway_engine::observability::{init_metrics, init_tracing};
use gateway_engine::runtime::process_manager::ProcessWorkerFactory;
use gateway_engine::utils::clock::TokioClock;
use gateway_engine::{BuildInfo, EngineConfig, Priority, WorkRequest, WorkerPool};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One request line; `id` and `timeout_ms` are optional on the wire
#[derive(Debug, Deserialize)]
struct RequestLine {
    id: Option<String>,
    session_id: String,
    #[serde(default)]
    tenant_id: String,
    #[serde(default)]
    priority: Priority,
    timeout_ms: Option<u64>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl RequestLine {
    fn into_request(self) -> WorkRequest {
        let id = self.id.unwrap_or_else(|| ulid::Ulid::new().to_string());
        let mut request = WorkRequest::new(id, self.session_id, self.payload)
            .with_tenant(self.tenant_id)
            .with_priority(self.priority);
        if let Some(timeout_ms) = self.timeout_ms {
            request = request.with_timeout_ms(timeout_ms);
        }
        request
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability)?;
    if let Some(addr) = config.observability.metrics_addr {
        init_metrics(addr)?;
    }

    let build = BuildInfo::current();
    info!(
        git_hash = build.git_hash,
        "Starting Gateway Engine v{}", build.version
    );
    debug!("Configuration loaded: {:?}", config);

    let factory = ProcessWorkerFactory::new(config.worker.clone())?;
    let pool = WorkerPool::start(config.pool.clone(), Arc::new(factory), TokioClock::shared())
        .await
        .context("failed to start worker pool")?;

    // Outcomes are written by one task so lines never interleave
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("Input closed, shutting down");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<RequestLine>(&line) {
                    Ok(parsed) => {
                        let request = parsed.into_request();
                        let pool = pool.clone();
                        let out = out_tx.clone();
                        in_flight.spawn(async move {
                            let request_id = request.id.clone();
                            let line = match pool.submit(request).await {
                                Ok(response) => json!({ "ok": response }),
                                Err(e) => json!({ "request_id": request_id, "err": e }),
                            };
                            let _ = out.send(line.to_string());
                        });
                    }
                    Err(e) => {
                        warn!("Skipping malformed request line: {}", e);
                        let line = json!({
                            "err": { "error": "invalid_request", "message": e.to_string() }
                        });
                        let _ = out_tx.send(line.to_string());
                    }
                }
            }
            signal = &mut ctrl_c => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("Received shutdown signal, cleaning up...");
                break;
            }
        }
    }

    let report = pool.shutdown().await;
    while in_flight.join_next().await.is_some() {}

    let metrics = pool.metrics();
    info!(
        drained = report.drained,
        withdrawn = report.withdrawn,
        cancelled = report.cancelled_in_flight,
        workers_killed = report.workers_killed,
        total_processed = metrics.total_processed,
        total_errors = metrics.total_errors,
        "Engine stopped"
    );

    drop(out_tx);
    writer.await.context("output writer panicked")??;
    Ok(())
}
