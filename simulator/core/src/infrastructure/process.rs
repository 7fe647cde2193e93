// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OS process control for the supervisor.
//!
//! - [`ProcessLauncher`] spawns one responder process per spec, redirects its
//!   stderr into `<log_dir>/<id>.log` and waits for the readiness line.
//! - Signal helpers and a liveness probe used by `stop` and `status`.

use async_trait::async_trait;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::domain::responder::{ReadinessEvent, ResponderBootstrap};
use crate::domain::supervisor::{LaunchError, LaunchedResponder, ResponderLauncher};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches responders as `<program> <args..> --bootstrap <json>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    log_dir: PathBuf,
    startup_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_dir: log_dir.into(),
            startup_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

#[async_trait]
impl ResponderLauncher for ProcessLauncher {
    async fn launch(&self, bootstrap: &ResponderBootstrap) -> Result<LaunchedResponder, LaunchError> {
        std::fs::create_dir_all(&self.log_dir)
            .map_err(|e| LaunchError::Failed(format!("cannot create log dir: {}", e)))?;
        let log_path = self.log_dir.join(format!("{}.log", bootstrap.id));
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| LaunchError::Failed(format!("cannot open {:?}: {}", log_path, e)))?;

        let payload = serde_json::to_string(bootstrap)
            .map_err(|e| LaunchError::Failed(format!("cannot encode bootstrap: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--bootstrap")
            .arg(payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| LaunchError::Failed(format!("spawn failed: {}", e)))?;

        let pid = child
            .id()
            .ok_or_else(|| LaunchError::Failed("failed to get process ID".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::Failed("stdout was not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let readiness = match tokio::time::timeout(self.startup_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => serde_json::from_str::<ReadinessEvent>(&line)
                .map_err(|e| format!("unreadable readiness line {:?}: {}", line, e)),
            Ok(Ok(None)) => Err("exited before reporting readiness".to_string()),
            Ok(Err(e)) => Err(format!("reading readiness failed: {}", e)),
            Err(_) => Err(format!(
                "no readiness report within {:?}",
                self.startup_timeout
            )),
        };

        match readiness {
            Ok(ReadinessEvent::Ready { addr }) => {
                debug!(id = %bootstrap.id, pid, %addr, "Responder ready");
                let id = bootstrap.id.clone();
                // Keeps the stdout pipe open and reaps the child when it exits.
                tokio::spawn(async move {
                    let _stdout = lines;
                    watch_exit(id, pid, child).await;
                });
                Ok(LaunchedResponder { pid, addr })
            }
            Ok(ReadinessEvent::BindFailed { port, reason }) => {
                reap(&mut child).await;
                Err(LaunchError::Bind { port, reason })
            }
            Ok(ReadinessEvent::SetupFailed { reason }) => {
                reap(&mut child).await;
                Err(LaunchError::Failed(format!("setup failed: {}", reason)))
            }
            Err(reason) => {
                let _ = child.start_kill();
                reap(&mut child).await;
                Err(LaunchError::Failed(reason))
            }
        }
    }
}

async fn watch_exit(id: String, pid: u32, mut child: Child) {
    match child.wait().await {
        Ok(status) if status.success() => {
            info!(id = %id, pid, "Responder exited");
        }
        Ok(status) => {
            // Crashed responders are reported, never restarted.
            warn!(id = %id, pid, %status, "Responder exited abnormally");
        }
        Err(e) => {
            warn!(id = %id, pid, error = %e, "Failed to wait for responder");
        }
    }
}

async fn reap(child: &mut Child) {
    if tokio::time::timeout(Duration::from_secs(2), child.wait())
        .await
        .is_err()
    {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(unix)]
pub fn send_signal(pid: u32, signal: i32) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, _signal: i32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals require unix"))
}

#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGTERM)
}

#[cfg(unix)]
pub fn force_kill(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGKILL)
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> io::Result<()> {
    send_signal(pid, 15)
}

#[cfg(not(unix))]
pub fn force_kill(pid: u32) -> io::Result<()> {
    send_signal(pid, 9)
}

/// True when `pid` names a running (non-zombie) process.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: signal 0 only performs the existence and permission check.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    let exists = rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    exists && !is_zombie(pid)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // Field 3 of /proc/<pid>/stat, after the parenthesised command name
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let rest = &stat[stat.rfind(')')? + 1..];
            rest.trim_start().chars().next()
        })
        .map(|state| state == 'Z')
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Poll until every pid has exited or `grace` elapses. Returns the survivors.
pub async fn wait_for_exit(pids: &[u32], grace: Duration) -> Vec<u32> {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let survivors: Vec<u32> = pids.iter().copied().filter(|pid| process_alive(*pid)).collect();
        if survivors.is_empty() || tokio::time::Instant::now() >= deadline {
            return survivors;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::device_config::{ResponderKind, ResponderSpec};
    use crate::domain::identity::{IdentityConfig, IdentitySnapshot};
    use crate::domain::responder::ResponderSettings;

    fn bootstrap() -> ResponderBootstrap {
        let identity: IdentityConfig =
            serde_yaml::from_str("hostname: test\nip: 127.0.0.1\n").unwrap();
        ResponderBootstrap {
            id: "snmp-1161".to_string(),
            spec: ResponderSpec::new(ResponderKind::Snmp, 1161),
            identity: IdentitySnapshot::from_config(&identity),
            settings: ResponderSettings {
                bind_address: "127.0.0.1".parse().unwrap(),
                idle_timeout: Duration::from_secs(1),
                shutdown_grace: Duration::from_secs(1),
                announce: false,
                jobs_dir: PathBuf::from("jobs"),
            },
            log_level: None,
            log_format: None,
        }
    }

    fn shell(dir: &std::path::Path, script: &str) -> ProcessLauncher {
        ProcessLauncher::new("sh", dir)
            .with_args(["-c", script])
            .with_startup_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_ready_child_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = shell(
            dir.path(),
            r#"echo '{"event":"ready","addr":"127.0.0.1:1161"}'; echo 'to the log' >&2; exec sleep 30"#,
        );

        let launched = launcher.launch(&bootstrap()).await.unwrap();
        assert_eq!(launched.addr, "127.0.0.1:1161".parse().unwrap());
        assert!(process_alive(launched.pid));

        terminate(launched.pid).unwrap();
        assert!(wait_for_exit(&[launched.pid], Duration::from_secs(5)).await.is_empty());

        let log = std::fs::read_to_string(dir.path().join("snmp-1161.log")).unwrap();
        assert!(log.contains("to the log"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = shell(
            dir.path(),
            r#"echo '{"event":"bind_failed","port":1161,"reason":"in use"}'; exit 1"#,
        );

        match launcher.launch(&bootstrap()).await {
            Err(LaunchError::Bind { port, reason }) => {
                assert_eq!(port, 1161);
                assert_eq!(reason, "in use");
            }
            other => panic!("expected bind failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = shell(
            dir.path(),
            r#"echo '{"event":"setup_failed","reason":"cannot open job catalog"}'; exit 1"#,
        );

        match launcher.launch(&bootstrap()).await {
            Err(LaunchError::Failed(reason)) => assert!(reason.contains("cannot open job catalog")),
            other => panic!("expected setup failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_child_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = shell(dir.path(), "sleep 30");
        assert!(matches!(
            launcher.launch(&bootstrap()).await,
            Err(LaunchError::Failed(_))
        ));

        let launcher = shell(dir.path(), "exit 0");
        assert!(matches!(
            launcher.launch(&bootstrap()).await,
            Err(LaunchError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_liveness_probe_sees_exit() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(process_alive(pid));

        terminate(pid).unwrap();
        // Unreaped children linger as zombies, which count as dead.
        assert!(wait_for_exit(&[pid], Duration::from_secs(5)).await.is_empty());
        let _ = child.wait();
        assert!(!process_alive(0));
    }
}
