// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Supervisor state
//!
//! Types shared between the supervisor service, the run-file store and the
//! CLI: the persisted lock and child list, status views, and the launcher
//! seam the supervisor uses to create responder processes.
//!
//! ## Exit codes
//! | Outcome | Code |
//! |---------|------|
//! | success | 0 |
//! | any other failure | 1 |
//! | `AlreadyRunning` | 2 |
//! | `NotRunning` | 3 |
//! | `ConfigInvalid` | 4 |
//! | `BindError` | 5 |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::device_config::{ConfigError, ResponderKind};
use crate::domain::responder::ResponderBootstrap;

/// Contents of `<run_dir>/devsim.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub config_path: PathBuf,
}

/// One entry of `<run_dir>/children.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub id: String,
    pub kind: ResponderKind,
    pub port: u16,
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub pid: u32,
    pub alive: bool,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderStatus {
    pub id: String,
    pub kind: ResponderKind,
    pub port: u16,
    pub pid: u32,
    pub alive: bool,
    pub last_checked: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub master: ProcessStatus,
    pub started_at: DateTime<Utc>,
    pub config_path: PathBuf,
    pub responders: Vec<ResponderStatus>,
}

impl SupervisorStatus {
    pub fn all_alive(&self) -> bool {
        self.master.alive && self.responders.iter().all(|r| r.alive)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartReport {
    pub master_pid: u32,
    pub started_at: DateTime<Utc>,
    pub responders: Vec<ChildEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopReport {
    pub master_pid: Option<u32>,
    /// Exited after SIGTERM
    pub terminated: Vec<String>,
    /// Needed SIGKILL after the grace period
    pub killed: Vec<String>,
}

/// A responder process that bound its port and is serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedResponder {
    pub pid: u32,
    pub addr: SocketAddr,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("bind failed on port {port}: {reason}")]
    Bind { port: u16, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// Creates one responder process and waits for its bind result.
#[async_trait]
pub trait ResponderLauncher: Send + Sync {
    async fn launch(&self, bootstrap: &ResponderBootstrap) -> Result<LaunchedResponder, LaunchError>;
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("devsim is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("devsim is not running")]
    NotRunning,

    #[error("Configuration invalid: {0}")]
    ConfigInvalid(#[from] ConfigError),

    #[error("{kind} responder could not bind port {port}: {reason}")]
    BindError {
        kind: ResponderKind,
        port: u16,
        reason: String,
    },

    #[error("{kind} responder on port {port} failed to launch: {reason}")]
    LaunchFailed {
        kind: ResponderKind,
        port: u16,
        reason: String,
    },

    #[error("Run file error: {0}")]
    RunFiles(#[from] RunFileError),
}

impl SupervisorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorError::AlreadyRunning { .. } => 2,
            SupervisorError::NotRunning => 3,
            SupervisorError::ConfigInvalid(_) => 4,
            SupervisorError::BindError { .. } => 5,
            SupervisorError::LaunchFailed { .. } | SupervisorError::RunFiles(_) => 1,
        }
    }

    /// Stable machine-readable name used in `--json` output.
    pub fn code(&self) -> &'static str {
        match self {
            SupervisorError::AlreadyRunning { .. } => "already_running",
            SupervisorError::NotRunning => "not_running",
            SupervisorError::ConfigInvalid(_) => "config_invalid",
            SupervisorError::BindError { .. } => "bind_error",
            SupervisorError::LaunchFailed { .. } => "launch_failed",
            SupervisorError::RunFiles(_) => "run_files",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunFileError {
    #[error("Lock file already exists: {0:?}")]
    LockExists(PathBuf),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed run file {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
