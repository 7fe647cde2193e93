// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Responder child mode (`devsim --bootstrap <json>`)
//!
//! Binds the configured port and prepares the responder, reports the result
//! as one readiness line on stdout, then serves until SIGTERM.

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use devsim_core::domain::responder::{ReadinessEvent, ResponderBootstrap};
use devsim_core::infrastructure::responders::build_responder;

use super::shutdown_signal;

pub async fn run_responder(bootstrap: ResponderBootstrap) -> Result<i32> {
    let responder = build_responder(bootstrap.spec.kind, &bootstrap.settings);
    let port = bootstrap.spec.port;

    let listener = match responder.bind(port).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(id = %bootstrap.id, error = %e, "Bind failed");
            announce(&ReadinessEvent::BindFailed {
                port,
                reason: e.to_string(),
            })?;
            return Ok(5);
        }
    };
    if let Err(e) = responder.prepare().await {
        error!(id = %bootstrap.id, error = %e, "Responder setup failed");
        announce(&ReadinessEvent::SetupFailed {
            reason: e.to_string(),
        })?;
        return Ok(1);
    }

    let addr = listener.local_addr().context("Failed to read bound address")?;
    announce(&ReadinessEvent::Ready { addr })?;
    info!(id = %bootstrap.id, pid = std::process::id(), %addr, "Responder ready");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let identity = Arc::new(bootstrap.identity);
    if let Err(e) = responder.serve(listener, identity, shutdown).await {
        error!(id = %bootstrap.id, error = %e, "Responder failed");
        return Ok(1);
    }
    Ok(0)
}

fn announce(event: &ReadinessEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("Failed to encode readiness event")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line).context("Failed to write readiness event")?;
    stdout.flush().context("Failed to flush readiness event")?;
    Ok(())
}
