// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Master and responder process modes
//!
//! Handles:
//! - Spawning the detached master and reading its start outcome
//! - The master loop (supervisor, admin API, metrics, graceful shutdown)
//! - The hidden responder mode every child process runs in

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use devsim_core::domain::supervisor::{StartReport, StopReport, SupervisorError, SupervisorStatus};
use devsim_core::infrastructure::RunFiles;

pub mod responder;
pub mod server;

pub use responder::run_responder;
pub use server::run_master;

/// Log file of the master process, next to the responder logs.
pub const MASTER_LOG_ID: &str = "master";

/// One control-operation result, printed as a single JSON line.
///
/// The master writes it to stdout once startup settles; `--json` prints the
/// same shape for every control command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ControlOutcome {
    Started(StartReport),
    Stopped(StopReport),
    Status(SupervisorStatus),
    Failed {
        error: String,
        message: String,
        exit_code: i32,
    },
}

impl ControlOutcome {
    pub fn failed(error: impl Into<String>, message: impl Into<String>, exit_code: i32) -> Self {
        ControlOutcome::Failed {
            error: error.into(),
            message: message.into(),
            exit_code,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ControlOutcome::Failed { exit_code, .. } => *exit_code,
            _ => 0,
        }
    }
}

impl From<&SupervisorError> for ControlOutcome {
    fn from(err: &SupervisorError) -> Self {
        ControlOutcome::failed(err.code(), err.to_string(), err.exit_code())
    }
}

/// Print one outcome line to stdout and flush it.
pub fn emit(outcome: &ControlOutcome) -> Result<()> {
    let line = serde_json::to_string(outcome).context("Failed to encode outcome")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line).context("Failed to write outcome")?;
    stdout.flush().context("Failed to flush outcome")?;
    Ok(())
}

/// Re-exec the current binary as a detached master and wait for its start
/// outcome. The master's stderr goes to `<run_dir>/logs/master.log`.
pub async fn spawn_master(
    config_path: &Path,
    run_dir: &Path,
    log_level: Option<&str>,
    timeout: Duration,
) -> Result<ControlOutcome> {
    let files = RunFiles::new(run_dir);
    files.ensure_dirs().context("Failed to prepare run directory")?;
    let log_path = files.log_path(MASTER_LOG_ID);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open master log {:?}", log_path))?;

    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;
    let mut cmd = tokio::process::Command::new(current_exe);
    cmd.arg("--daemon")
        .arg("--config")
        .arg(config_path)
        .arg("--run-dir")
        .arg(run_dir);
    if let Some(level) = log_level {
        // Picked up by the config loader, so responders inherit it too.
        cmd.env("DEVSIM_LOG_LEVEL", level);
    }

    // Detach from the terminal's process group
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::from(log_file))
        .kill_on_drop(false);

    let mut child = cmd.spawn().context("Failed to spawn master process")?;
    let pid = child.id().unwrap_or_default();
    info!(pid, log = ?log_path, "Master spawned, waiting for start outcome");

    let stdout = child.stdout.take().context("Master stdout was not captured")?;
    let mut lines = BufReader::new(stdout).lines();

    match tokio::time::timeout(timeout, lines.next_line()).await {
        Ok(Ok(Some(line))) => {
            let outcome: ControlOutcome = serde_json::from_str(&line)
                .with_context(|| format!("Unexpected master output: {}", line))?;
            if matches!(outcome, ControlOutcome::Failed { .. }) {
                let _ = child.wait().await;
            }
            Ok(outcome)
        }
        Ok(Ok(None)) => {
            let status = child.wait().await.context("Failed to reap master")?;
            anyhow::bail!(
                "Master exited ({}) without reporting; see {}",
                status,
                log_path.display()
            )
        }
        Ok(Err(e)) => Err(e).context("Failed to read master outcome"),
        Err(_) => {
            warn!(pid, "Master did not report in time, killing it");
            let _ = child.start_kill();
            let _ = child.wait().await;
            anyhow::bail!(
                "Master did not report within {:?}; see {}",
                timeout,
                log_path.display()
            )
        }
    }
}

/// Make a path absolute against the current directory so detached processes
/// agree on it.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Failed to resolve {:?}", path))
}

/// Resolves on SIGTERM or Ctrl+C.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
