// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Runtime lifecycle commands
//!
//! Commands: start, stop, restart, status. Each returns the process exit code.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use devsim_core::application::Supervisor;
use devsim_core::domain::device_config::DeviceConfigManifest;
use devsim_core::domain::supervisor::{StartReport, StopReport, SupervisorError, SupervisorStatus};
use devsim_core::infrastructure::{ProcessLauncher, RunFiles};

use super::GlobalArgs;
use crate::daemon::{emit, spawn_master, ControlOutcome};

/// Added to the per-responder startup budget while waiting for the master.
const MASTER_REPORT_SLACK: Duration = Duration::from_secs(10);

pub async fn start(args: &GlobalArgs) -> Result<i32> {
    let outcome = match DeviceConfigManifest::resolve_path(args.config.as_deref()) {
        Ok(path) => start_master(args, &crate::daemon::absolute(&path)?).await?,
        Err(e) => ControlOutcome::from(&SupervisorError::ConfigInvalid(e)),
    };
    report(args, &outcome);
    Ok(outcome.exit_code())
}

pub async fn stop(args: &GlobalArgs, timeout: u64) -> Result<i32> {
    let supervisor = supervisor(args, timeout)?;
    let outcome = match supervisor.stop().await {
        Ok(report) => ControlOutcome::Stopped(report),
        Err(e) => ControlOutcome::from(&e),
    };
    report(args, &outcome);
    Ok(outcome.exit_code())
}

pub async fn restart(args: &GlobalArgs, timeout: u64) -> Result<i32> {
    let supervisor = supervisor(args, timeout)?;
    match supervisor.stop().await {
        Ok(report) => {
            if !args.json {
                print_stopped(&report);
            }
        }
        Err(SupervisorError::NotRunning) => info!("Nothing to stop"),
        Err(e) => {
            let outcome = ControlOutcome::from(&e);
            report(args, &outcome);
            return Ok(outcome.exit_code());
        }
    }
    start(args).await
}

pub async fn status(args: &GlobalArgs) -> Result<i32> {
    let supervisor = supervisor(args, 0)?;
    let outcome = match supervisor.status() {
        Ok(status) => ControlOutcome::Status(status),
        Err(e) => ControlOutcome::from(&e),
    };
    report(args, &outcome);
    Ok(outcome.exit_code())
}

async fn start_master(args: &GlobalArgs, config_path: &Path) -> Result<ControlOutcome> {
    // Fail fast on a bad config before anything is spawned
    let manifest = match DeviceConfigManifest::load(config_path) {
        Ok(manifest) => manifest,
        Err(e) => return Ok(ControlOutcome::from(&SupervisorError::ConfigInvalid(e))),
    };
    let run_dir = args.resolve_run_dir()?;

    let responders = manifest.spec.responders.len() as u32;
    let timeout = manifest.spec.runtime.startup_timeout * responders.max(1) + MASTER_REPORT_SLACK;
    info!(config = ?config_path, run_dir = ?run_dir, "Starting devsim master");

    spawn_master(config_path, &run_dir, args.log_level.as_deref(), timeout)
        .await
        .context("Failed to start master")
}

fn supervisor(args: &GlobalArgs, timeout_secs: u64) -> Result<Supervisor> {
    let run_dir = args.resolve_run_dir()?;
    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;
    let launcher = ProcessLauncher::new(current_exe, RunFiles::new(&run_dir).log_dir());
    Ok(Supervisor::new(run_dir, Arc::new(launcher)).with_stop_grace(Duration::from_secs(timeout_secs)))
}

fn report(args: &GlobalArgs, outcome: &ControlOutcome) {
    if args.json {
        if let Err(e) = emit(outcome) {
            eprintln!("{}", format!("✗ {:#}", e).red());
        }
        return;
    }

    match outcome {
        ControlOutcome::Started(report) => print_started(report),
        ControlOutcome::Stopped(report) => print_stopped(report),
        ControlOutcome::Status(status) => print_status(status),
        ControlOutcome::Failed { error, message, .. } => {
            eprintln!("{}", format!("✗ {}", message).red());
            if error == "already_running" {
                eprintln!("Use 'devsim stop' to stop it first.");
            }
        }
    }
}

fn print_started(report: &StartReport) {
    println!(
        "{}",
        format!("✓ devsim started (master PID: {})", report.master_pid).green()
    );
    for responder in &report.responders {
        println!(
            "  {:<24} {:>5}  PID {}",
            responder.id, responder.port, responder.pid
        );
    }
    println!("Check status with: devsim status");
}

fn print_stopped(report: &StopReport) {
    if let Some(pid) = report.master_pid {
        println!("{}", format!("✓ devsim stopped (master PID: {})", pid).green());
    } else {
        println!("{}", "✓ devsim stopped".green());
    }
    if !report.killed.is_empty() {
        println!(
            "{}",
            format!("⚠ Force-killed after grace period: {}", report.killed.join(", ")).yellow()
        );
    }
}

fn print_status(status: &SupervisorStatus) {
    let uptime = chrono::Utc::now()
        .signed_duration_since(status.started_at)
        .num_seconds()
        .max(0) as u64;

    if status.master.alive {
        println!("{}", "✓ devsim is running".green());
    } else {
        println!("{}", "⚠ devsim master is gone (stale lock)".yellow());
    }
    println!("  Master PID: {}", status.master.pid);
    println!("  Uptime: {}", format_duration(uptime));
    println!("  Config: {}", status.config_path.display());
    println!();
    println!("  {:<24} {:<16} {:>5} {:>8}  STATE", "RESPONDER", "KIND", "PORT", "PID");
    for responder in &status.responders {
        let state = if responder.alive {
            "alive".green()
        } else {
            "exited".red()
        };
        println!(
            "  {:<24} {:<16} {:>5} {:>8}  {}",
            responder.id, responder.kind.as_str(), responder.port, responder.pid, state
        );
    }
}

fn format_duration(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, secs % 60)
    }
}
