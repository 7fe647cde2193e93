// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Process Supervisor
//!
//! The only component with cross-process authority. Control operations are
//! sequential and leave the run directory in one of two states:
//!
//! | State | `devsim.lock` | `children.json` |
//! |-------|---------------|-----------------|
//! | stopped | absent | absent |
//! | running | master pid | one entry per responder |
//!
//! `start` is all-or-nothing: every responder must report a successful bind
//! before the lock is written; otherwise everything launched in the attempt
//! is terminated. `stop` is best-effort then forceful. Crashed responders are
//! never restarted.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::device_config::DeviceConfigManifest;
use crate::domain::responder::{ResponderBootstrap, ResponderSettings};
use crate::domain::supervisor::{
    ChildEntry, LaunchError, LockRecord, ProcessStatus, ResponderLauncher, ResponderStatus,
    RunFileError, StartReport, StopReport, SupervisorError, SupervisorStatus,
};
use crate::infrastructure::process::{force_kill, process_alive, terminate, wait_for_exit};
use crate::infrastructure::run_files::RunFiles;

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Result of a successful `start`: what was launched plus the loaded config,
/// which the master keeps using for its own services.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub report: StartReport,
    pub manifest: DeviceConfigManifest,
}

pub struct Supervisor {
    files: RunFiles,
    launcher: Arc<dyn ResponderLauncher>,
    stop_grace: Duration,
    master_pid: u32,
}

impl Supervisor {
    pub fn new(run_dir: impl Into<PathBuf>, launcher: Arc<dyn ResponderLauncher>) -> Self {
        Self {
            files: RunFiles::new(run_dir),
            launcher,
            stop_grace: DEFAULT_STOP_GRACE,
            master_pid: std::process::id(),
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Pid recorded as the master. Defaults to the calling process.
    pub fn with_master_pid(mut self, pid: u32) -> Self {
        self.master_pid = pid;
        self
    }

    pub fn run_files(&self) -> &RunFiles {
        &self.files
    }

    pub async fn start(&self, config_path: &Path) -> Result<StartOutcome, SupervisorError> {
        self.files.ensure_dirs()?;
        self.clear_stale_lock()?;

        let mut manifest = DeviceConfigManifest::load(config_path)?;
        manifest.spec.storage.run_dir = self.files.run_dir().to_path_buf();

        let identity = manifest.identity_snapshot();
        let settings = ResponderSettings::from_manifest(&manifest);
        let logging = manifest.logging();

        let mut launched: Vec<ChildEntry> = Vec::new();
        for spec in &manifest.spec.responders {
            let bootstrap = ResponderBootstrap {
                id: spec.id(),
                spec: *spec,
                identity: identity.clone(),
                settings: settings.clone(),
                log_level: Some(logging.level.clone()),
                log_format: Some(logging.format.clone()),
            };

            match self.launcher.launch(&bootstrap).await {
                Ok(child) => {
                    info!(id = %bootstrap.id, pid = child.pid, addr = %child.addr, "Responder started");
                    launched.push(ChildEntry {
                        id: bootstrap.id,
                        kind: spec.kind,
                        port: spec.port,
                        pid: child.pid,
                    });
                }
                Err(e) => {
                    warn!(id = %bootstrap.id, error = %e, "Responder failed to start, rolling back");
                    self.terminate_all(&launched).await;
                    return Err(match e {
                        LaunchError::Bind { port, reason } => SupervisorError::BindError {
                            kind: spec.kind,
                            port,
                            reason,
                        },
                        LaunchError::Failed(reason) => SupervisorError::LaunchFailed {
                            kind: spec.kind,
                            port: spec.port,
                            reason,
                        },
                    });
                }
            }
        }

        let lock = LockRecord {
            pid: self.master_pid,
            started_at: Utc::now(),
            config_path: config_path.to_path_buf(),
        };
        if let Err(e) = self.files.create_lock(&lock) {
            self.terminate_all(&launched).await;
            return Err(match e {
                RunFileError::LockExists(_) => {
                    let pid = self.files.read_lock().ok().flatten().map(|l| l.pid).unwrap_or(0);
                    SupervisorError::AlreadyRunning { pid }
                }
                other => other.into(),
            });
        }

        if let Err(e) = self.files.write_children(&launched) {
            self.terminate_all(&launched).await;
            let _ = self.files.remove_lock();
            return Err(e.into());
        }

        info!(
            master = self.master_pid,
            responders = launched.len(),
            run_dir = ?self.files.run_dir(),
            "devsim started"
        );
        Ok(StartOutcome {
            report: StartReport {
                master_pid: self.master_pid,
                started_at: lock.started_at,
                responders: launched,
            },
            manifest,
        })
    }

    pub async fn stop(&self) -> Result<StopReport, SupervisorError> {
        let lock = match self.files.read_lock() {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                self.files.remove_children()?;
                return Err(SupervisorError::NotRunning);
            }
            Err(e) => {
                warn!(error = %e, "Unreadable lock file, stopping recorded children anyway");
                None
            }
        };

        let children = self.files.read_children().unwrap_or_else(|e| {
            warn!(error = %e, "Unreadable child list");
            Vec::new()
        });

        let mut targets: Vec<(String, u32)> = children
            .iter()
            .map(|c| (c.id.clone(), c.pid))
            .collect();
        if let Some(lock) = &lock {
            // The master may be the caller, e.g. a daemon handling SIGTERM.
            if lock.pid != std::process::id() {
                targets.push(("master".to_string(), lock.pid));
            }
        }

        let mut signalled = Vec::new();
        for (id, pid) in &targets {
            if !process_alive(*pid) {
                debug!(%id, pid, "Already exited");
                continue;
            }
            match terminate(*pid) {
                Ok(()) => signalled.push((id.clone(), *pid)),
                Err(e) => warn!(%id, pid, error = %e, "SIGTERM failed"),
            }
        }

        let pids: Vec<u32> = signalled.iter().map(|(_, pid)| *pid).collect();
        let survivors = wait_for_exit(&pids, self.stop_grace).await;

        let mut report = StopReport {
            master_pid: lock.as_ref().map(|l| l.pid),
            ..Default::default()
        };
        for (id, pid) in signalled {
            if survivors.contains(&pid) {
                warn!(%id, pid, "Did not exit within grace period, sending SIGKILL");
                if let Err(e) = force_kill(pid) {
                    warn!(%id, pid, error = %e, "SIGKILL failed");
                }
                report.killed.push(id);
            } else {
                report.terminated.push(id);
            }
        }
        if !report.killed.is_empty() {
            wait_for_exit(&survivors, Duration::from_secs(1)).await;
        }

        self.files.remove_children()?;
        self.files.remove_lock()?;
        info!(terminated = report.terminated.len(), killed = report.killed.len(), "devsim stopped");
        Ok(report)
    }

    pub async fn restart(&self, config_path: &Path) -> Result<StartOutcome, SupervisorError> {
        match self.stop().await {
            Ok(_) | Err(SupervisorError::NotRunning) => {}
            Err(e) => return Err(e),
        }
        self.start(config_path).await
    }

    /// Read-only snapshot of master and responder liveness.
    pub fn status(&self) -> Result<SupervisorStatus, SupervisorError> {
        let lock = self.files.read_lock()?.ok_or(SupervisorError::NotRunning)?;
        let children = self.files.read_children()?;
        let now = Utc::now();

        Ok(SupervisorStatus {
            master: ProcessStatus {
                pid: lock.pid,
                alive: process_alive(lock.pid),
                last_checked: now,
            },
            started_at: lock.started_at,
            config_path: lock.config_path,
            responders: children
                .into_iter()
                .map(|child| ResponderStatus {
                    alive: process_alive(child.pid),
                    last_checked: Utc::now(),
                    id: child.id,
                    kind: child.kind,
                    port: child.port,
                    pid: child.pid,
                })
                .collect(),
        })
    }

    fn clear_stale_lock(&self) -> Result<(), SupervisorError> {
        let lock = match self.files.read_lock() {
            Ok(None) => return Ok(()),
            Ok(Some(lock)) => lock,
            Err(RunFileError::Malformed { path, .. }) => {
                warn!(?path, "Removing unreadable lock file");
                self.files.remove_lock()?;
                self.files.remove_children()?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if process_alive(lock.pid) {
            return Err(SupervisorError::AlreadyRunning { pid: lock.pid });
        }

        let lingering: Vec<u32> = self
            .files
            .read_children()
            .unwrap_or_default()
            .iter()
            .map(|c| c.pid)
            .filter(|pid| process_alive(*pid))
            .collect();
        if !lingering.is_empty() {
            warn!(?lingering, "Responders of a dead master are still running");
        }
        warn!(pid = lock.pid, "Removing stale lock of dead master");
        self.files.remove_lock()?;
        self.files.remove_children()?;
        Ok(())
    }

    async fn terminate_all(&self, children: &[ChildEntry]) {
        for child in children {
            if let Err(e) = terminate(child.pid) {
                debug!(id = %child.id, pid = child.pid, error = %e, "SIGTERM failed during rollback");
            }
        }
        let pids: Vec<u32> = children.iter().map(|c| c.pid).collect();
        for pid in wait_for_exit(&pids, self.stop_grace).await {
            let _ = force_kill(pid);
        }
    }
}
