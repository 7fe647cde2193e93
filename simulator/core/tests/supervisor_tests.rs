// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Supervisor lifecycle against real child processes.
//!
//! The launcher here spawns `sleep` instead of responder processes so the
//! tests exercise lock handling, rollback and signalling without binding
//! privileged ports.

use async_trait::async_trait;
use devsim_core::application::Supervisor;
use devsim_core::domain::responder::ResponderBootstrap;
use devsim_core::domain::supervisor::{
    LaunchError, LaunchedResponder, LockRecord, ResponderLauncher, SupervisorError,
};
use devsim_core::infrastructure::process::process_alive;
use devsim_core::infrastructure::RunFiles;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Spawns `sleep 30` per responder; refuses to "bind" one configured port.
struct SleepLauncher {
    failing_port: Option<u16>,
    spawned: Mutex<Vec<u32>>,
}

impl SleepLauncher {
    fn new() -> Arc<Self> {
        Arc::new(Self { failing_port: None, spawned: Mutex::new(Vec::new()) })
    }

    fn failing_on(port: u16) -> Arc<Self> {
        Arc::new(Self { failing_port: Some(port), spawned: Mutex::new(Vec::new()) })
    }

    fn spawned(&self) -> Vec<u32> {
        self.spawned.lock().clone()
    }
}

#[async_trait]
impl ResponderLauncher for SleepLauncher {
    async fn launch(&self, bootstrap: &ResponderBootstrap) -> Result<LaunchedResponder, LaunchError> {
        if Some(bootstrap.spec.port) == self.failing_port {
            return Err(LaunchError::Bind {
                port: bootstrap.spec.port,
                reason: "Address already in use".to_string(),
            });
        }

        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| LaunchError::Failed(e.to_string()))?;
        let pid = child.id().ok_or_else(|| LaunchError::Failed("no pid".to_string()))?;
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        self.spawned.lock().push(pid);
        Ok(LaunchedResponder {
            pid,
            addr: format!("127.0.0.1:{}", bootstrap.spec.port).parse().unwrap(),
        })
    }
}

fn write_config(dir: &Path, ports: &[(&str, u16)]) -> PathBuf {
    let responders: String = ports
        .iter()
        .map(|(kind, port)| format!("    - {{ kind: {}, port: {} }}\n", kind, port))
        .collect();
    let yaml = format!(
        "apiVersion: devsim/v1\n\
         kind: DeviceConfig\n\
         metadata:\n  name: test-printer\n\
         spec:\n\
         \x20 identity:\n    hostname: HPLJ-TEST\n    ip: 127.0.0.1\n\
         \x20 responders:\n{}",
        responders
    );
    let path = dir.join("devsim.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

fn three_responders(dir: &Path) -> PathBuf {
    write_config(dir, &[("job-ingest", 19100), ("snmp", 11161), ("name-resolution", 15355)])
}

fn supervisor(run_dir: &Path, launcher: Arc<SleepLauncher>) -> Supervisor {
    Supervisor::new(run_dir, launcher).with_stop_grace(Duration::from_secs(2))
}

async fn all_dead(pids: &[u32]) -> bool {
    for _ in 0..40 {
        if pids.iter().all(|pid| !process_alive(*pid)) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_start_status_stop() {
    let dir = TempDir::new().unwrap();
    let config = three_responders(dir.path());
    let run_dir = dir.path().join("run");
    let launcher = SleepLauncher::new();
    let sup = supervisor(&run_dir, launcher.clone());

    let outcome = sup.start(&config).await.unwrap();
    assert_eq!(outcome.report.responders.len(), 3);
    assert_eq!(outcome.report.master_pid, std::process::id());
    assert_eq!(outcome.manifest.spec.storage.run_dir, run_dir);

    let status = sup.status().unwrap();
    assert_eq!(status.responders.len(), 3);
    assert!(status.all_alive());
    assert_eq!(status.responders[0].id, "job-ingest-19100");

    let report = sup.stop().await.unwrap();
    assert_eq!(report.terminated.len(), 3);
    assert!(report.killed.is_empty());
    assert!(all_dead(&launcher.spawned()).await);

    let files = RunFiles::new(&run_dir);
    assert!(!files.lock_path().exists());
    assert!(!files.children_path().exists());
    assert!(matches!(sup.status(), Err(SupervisorError::NotRunning)));
}

#[tokio::test]
async fn test_second_start_is_rejected_until_stopped() {
    let dir = TempDir::new().unwrap();
    let config = three_responders(dir.path());
    let launcher = SleepLauncher::new();
    let sup = supervisor(&dir.path().join("run"), launcher.clone());

    sup.start(&config).await.unwrap();
    let err = sup.start(&config).await.unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning { pid } if pid == std::process::id()));
    assert_eq!(err.exit_code(), 2);
    // The rejected attempt launched nothing
    assert_eq!(launcher.spawned().len(), 3);

    sup.stop().await.unwrap();
    sup.start(&config).await.unwrap();
    sup.stop().await.unwrap();
    assert!(all_dead(&launcher.spawned()).await);
}

#[tokio::test]
async fn test_stop_without_start() {
    let dir = TempDir::new().unwrap();
    let run_dir = dir.path().join("run");
    let sup = supervisor(&run_dir, SleepLauncher::new());

    let err = sup.stop().await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotRunning));
    assert_eq!(err.exit_code(), 3);

    let files = RunFiles::new(&run_dir);
    assert!(!files.lock_path().exists());
    assert!(!files.children_path().exists());
}

#[tokio::test]
async fn test_bind_failure_rolls_back() {
    let dir = TempDir::new().unwrap();
    let config = three_responders(dir.path());
    let run_dir = dir.path().join("run");
    let launcher = SleepLauncher::failing_on(15355);
    let sup = supervisor(&run_dir, launcher.clone());

    let err = sup.start(&config).await.unwrap_err();
    assert!(matches!(err, SupervisorError::BindError { port: 15355, .. }));
    assert_eq!(err.exit_code(), 5);

    assert_eq!(launcher.spawned().len(), 2);
    assert!(all_dead(&launcher.spawned()).await);
    assert!(!RunFiles::new(&run_dir).lock_path().exists());
    assert!(matches!(sup.status(), Err(SupervisorError::NotRunning)));
}

#[tokio::test]
async fn test_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), &[("snmp", 11161), ("job-ingest", 11161)]);
    let sup = supervisor(&dir.path().join("run"), SleepLauncher::new());

    let err = sup.start(&config).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ConfigInvalid(_)));
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_stale_lock_is_replaced() {
    let dir = TempDir::new().unwrap();
    let config = three_responders(dir.path());
    let run_dir = dir.path().join("run");

    // A pid that is guaranteed to be gone
    let mut exited = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = exited.id();
    exited.wait().unwrap();

    let files = RunFiles::new(&run_dir);
    files.ensure_dirs().unwrap();
    files
        .create_lock(&LockRecord {
            pid: dead_pid,
            started_at: chrono::Utc::now(),
            config_path: config.clone(),
        })
        .unwrap();

    let sup = supervisor(&run_dir, SleepLauncher::new());
    let outcome = sup.start(&config).await.unwrap();
    assert_eq!(files.read_lock().unwrap().unwrap().pid, outcome.report.master_pid);
    sup.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_when_stopped() {
    let dir = TempDir::new().unwrap();
    let config = three_responders(dir.path());
    let launcher = SleepLauncher::new();
    let sup = supervisor(&dir.path().join("run"), launcher.clone());

    sup.restart(&config).await.unwrap();
    let first = launcher.spawned();
    sup.restart(&config).await.unwrap();
    assert!(all_dead(&first).await);
    assert!(sup.status().unwrap().all_alive());
    sup.stop().await.unwrap();
}
