// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Master process: supervises responders and serves the admin API

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use devsim_core::application::{AdminGateway, SessionService, Supervisor};
use devsim_core::domain::device_config::DeviceConfigManifest;
use devsim_core::domain::session::PasswordHash;
use devsim_core::domain::supervisor::SupervisorError;
use devsim_core::infrastructure::{FileJobCatalog, ProcessLauncher, RunFiles};
use devsim_core::presentation::api;

use super::{emit, shutdown_signal, ControlOutcome};

/// Run the master until SIGTERM. Returns the process exit code.
///
/// Exactly one outcome line is written to stdout: the start report, or the
/// failure that aborted startup.
pub async fn run_master(config_path: PathBuf, run_dir: PathBuf) -> Result<i32> {
    let pid = std::process::id();
    info!("devsim master starting (PID: {})", pid);

    let current_exe = std::env::current_exe().context("Failed to get current executable path")?;
    let mut launcher = ProcessLauncher::new(current_exe, RunFiles::new(&run_dir).log_dir());
    if let Ok(manifest) = DeviceConfigManifest::load(&config_path) {
        launcher = launcher.with_startup_timeout(manifest.spec.runtime.startup_timeout);
    }
    let supervisor = Supervisor::new(&run_dir, Arc::new(launcher));

    let started = match supervisor.start(&config_path).await {
        Ok(started) => started,
        Err(e) => {
            error!(error = %e, "Start failed");
            emit(&ControlOutcome::from(&e))?;
            return Ok(e.exit_code());
        }
    };
    let manifest = started.manifest;

    let shutdown = CancellationToken::new();
    let mut admin_task = None;

    if manifest.spec.admin.is_some() {
        match serve_admin(&manifest, shutdown.clone()).await {
            Ok(handle) => admin_task = Some(handle),
            Err(e) => {
                error!(error = %e, "Admin API failed to start, stopping responders");
                if let Err(stop_err) = supervisor.stop().await {
                    warn!(error = %stop_err, "Rollback stop failed");
                }
                emit(&ControlOutcome::failed("bind_error", format!("{:#}", e), 5))?;
                return Ok(5);
            }
        }
    }

    if let Some(metrics) = manifest.spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        match PrometheusBuilder::new().with_http_listener(metrics.listen).install() {
            Ok(()) => info!(addr = %metrics.listen, "Prometheus exporter listening"),
            Err(e) => warn!(addr = %metrics.listen, error = %e, "Prometheus exporter disabled"),
        }
    }

    emit(&ControlOutcome::Started(started.report))?;

    shutdown_signal().await;
    shutdown.cancel();

    match supervisor.stop().await {
        Ok(report) => info!(
            terminated = report.terminated.len(),
            killed = report.killed.len(),
            "Responders stopped"
        ),
        // `devsim stop` already cleaned up
        Err(SupervisorError::NotRunning) => {}
        Err(e) => warn!(error = %e, "Stop failed"),
    }

    if let Some(task) = admin_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Admin API task failed");
        }
    }

    info!("devsim master shutting down");
    Ok(0)
}

async fn serve_admin(
    manifest: &DeviceConfigManifest,
    shutdown: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let Some(admin) = &manifest.spec.admin else {
        anyhow::bail!("admin section missing");
    };
    let listen = admin.listen;
    let password = PasswordHash::parse(&admin.password_hash).context("Invalid admin password hash")?;
    let catalog = FileJobCatalog::open_read_only(manifest.spec.storage.resolved_jobs_dir())
        .await
        .context("Failed to open job catalog")?;

    let sessions = Arc::new(SessionService::new(admin.username.clone(), password));
    let gateway = Arc::new(
        AdminGateway::new(sessions, Arc::new(catalog)).with_preview_bytes(admin.preview_bytes),
    );
    let app = api::app(gateway);

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind admin API to {}", listen))?;
    info!("Admin API listening on {}", listen);

    Ok(tokio::spawn(async move {
        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
        if let Err(e) = served {
            error!(error = %e, "Admin API server failed");
        }
    }))
}
