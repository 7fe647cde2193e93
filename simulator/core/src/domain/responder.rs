// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Protocol Responder contract
//!
//! Every wire-protocol implementation follows the same lifecycle:
//!
//! 1. `bind(port)` acquires the socket. Nothing is served yet, which lets the
//!    supervisor commit a run only after every responder owns its port.
//! 2. `prepare()` acquires anything else the responder needs before it can
//!    answer (the job catalog for job-ingest).
//! 3. `serve(listener, identity, shutdown)` answers requests from the
//!    read-only [`IdentitySnapshot`] until `shutdown` is cancelled, then
//!    drains in-flight work for at most the configured grace window.
//!
//! `run` composes the three.
//!
//! The child process reports the outcome of `bind` and `prepare` to the
//! supervisor as one [`ReadinessEvent`] JSON line on stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use crate::domain::device_config::{DeviceConfigManifest, ResponderKind, ResponderSpec};
use crate::domain::identity::IdentitySnapshot;

/// A bound socket, owned by exactly one responder.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl Listener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr(),
            Listener::Udp(socket) => socket.local_addr(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("Failed to bind {kind} responder to port {port}: {source}")]
    Bind {
        kind: ResponderKind,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("{kind} responder was handed a {got} listener")]
    WrongListener {
        kind: ResponderKind,
        got: &'static str,
    },

    #[error("Responder I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Responder setup failed: {0}")]
    Setup(String),
}

#[async_trait]
pub trait Responder: Send + Sync {
    fn kind(&self) -> ResponderKind;

    async fn bind(&self, port: u16) -> Result<Listener, ResponderError>;

    /// Setup that must succeed before readiness is reported.
    async fn prepare(&self) -> Result<(), ResponderError> {
        Ok(())
    }

    async fn serve(
        &self,
        listener: Listener,
        identity: Arc<IdentitySnapshot>,
        shutdown: CancellationToken,
    ) -> Result<(), ResponderError>;

    async fn run(
        &self,
        identity: Arc<IdentitySnapshot>,
        port: u16,
        shutdown: CancellationToken,
    ) -> Result<(), ResponderError> {
        let listener = self.bind(port).await?;
        self.prepare().await?;
        self.serve(listener, identity, shutdown).await
    }
}

/// Runtime knobs shared by every responder of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderSettings {
    pub bind_address: IpAddr,

    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    pub announce: bool,

    /// Catalog directory, used by job-ingest only
    pub jobs_dir: PathBuf,
}

impl ResponderSettings {
    pub fn from_manifest(manifest: &DeviceConfigManifest) -> Self {
        let runtime = &manifest.spec.runtime;
        Self {
            bind_address: runtime.bind_address,
            idle_timeout: runtime.idle_timeout,
            shutdown_grace: runtime.shutdown_grace,
            announce: runtime.announce,
            jobs_dir: manifest.spec.storage.resolved_jobs_dir(),
        }
    }
}

/// Everything a responder process needs, handed over by the supervisor at spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderBootstrap {
    pub id: String,
    pub spec: ResponderSpec,
    pub identity: IdentitySnapshot,
    pub settings: ResponderSettings,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_format: Option<String>,
}

/// Startup-result line a responder process writes to stdout before serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReadinessEvent {
    Ready { addr: SocketAddr },
    BindFailed { port: u16, reason: String },
    SetupFailed { reason: String },
}
