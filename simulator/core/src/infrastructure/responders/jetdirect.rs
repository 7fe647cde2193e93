// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Job-ingest responder (raw TCP / JetDirect, port 9100 by convention).
//!
//! Per connection:
//!
//! ```text
//! OPEN -> RECEIVING -> CLASSIFY -> PERSIST -> RECORD -> CLOSE
//!            |  ^
//!            |  +-- PJL queries answered inline
//!            +----- UEL after document bytes ends a job, the connection continues
//! ```
//!
//! Control-only exchanges (status probes) never produce a record. An idle
//! connection is dropped and whatever it sent is discarded.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{bind_tcp, drain, expect_tcp, pjl};
use crate::domain::catalog::JobCatalog;
use crate::domain::device_config::ResponderKind;
use crate::domain::identity::IdentitySnapshot;
use crate::domain::job::{is_control_only, JobDraft, JobStatus, UEL};
use crate::domain::responder::{Listener, Responder, ResponderError, ResponderSettings};
use crate::infrastructure::catalog::FileJobCatalog;

const READ_CHUNK: usize = 8192;
const PJL_PREFIX: &[u8] = b"@PJL";
/// A PJL line longer than this is treated as document data.
const MAX_PJL_LINE: usize = 4096;

pub struct JetDirectResponder {
    settings: ResponderSettings,
    catalog: OnceCell<Arc<dyn JobCatalog>>,
}

impl JetDirectResponder {
    pub fn new(settings: ResponderSettings) -> Self {
        Self {
            settings,
            catalog: OnceCell::new(),
        }
    }

    /// Use an already opened catalog instead of opening `settings.jobs_dir`.
    pub fn with_catalog(settings: ResponderSettings, catalog: Arc<dyn JobCatalog>) -> Self {
        Self {
            settings,
            catalog: OnceCell::new_with(Some(catalog)),
        }
    }

    async fn catalog(&self) -> Result<Arc<dyn JobCatalog>, ResponderError> {
        self.catalog
            .get_or_try_init(|| async {
                let catalog = FileJobCatalog::open(&self.settings.jobs_dir)
                    .await
                    .map_err(|e| ResponderError::Setup(format!("cannot open job catalog: {}", e)))?;
                Ok::<_, ResponderError>(Arc::new(catalog) as Arc<dyn JobCatalog>)
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Responder for JetDirectResponder {
    fn kind(&self) -> ResponderKind {
        ResponderKind::JobIngest
    }

    async fn bind(&self, port: u16) -> Result<Listener, ResponderError> {
        bind_tcp(self.kind(), &self.settings, port).await
    }

    async fn prepare(&self) -> Result<(), ResponderError> {
        self.catalog().await.map(|_| ())
    }

    async fn serve(
        &self,
        listener: Listener,
        identity: Arc<IdentitySnapshot>,
        shutdown: CancellationToken,
    ) -> Result<(), ResponderError> {
        let listener = expect_tcp(self.kind(), listener)?;
        let catalog = self.catalog().await?;
        let idle_timeout = self.settings.idle_timeout;
        info!(addr = ?listener.local_addr().ok(), jobs_dir = ?self.settings.jobs_dir, "Job-ingest responder serving");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Ingest connection opened");
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            identity.clone(),
                            catalog.clone(),
                            idle_timeout,
                        ));
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        let in_flight = connections.len();
        let aborted = drain(connections, self.settings.shutdown_grace).await;
        info!(in_flight, aborted, "Job-ingest responder stopped");
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    identity: Arc<IdentitySnapshot>,
    catalog: Arc<dyn JobCatalog>,
    idle_timeout: Duration,
) {
    let mut session = IngestSession::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let read = tokio::time::timeout(idle_timeout, stream.read(&mut buf)).await;
        let n = match read {
            Err(_) => {
                warn!(%peer, pending = session.pending_len(), "Ingest connection idle, discarding pending bytes");
                return;
            }
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "Ingest connection broke");
                if let Some(partial) = session.take_partial() {
                    persist(&catalog, peer, partial, JobStatus::Failed).await;
                }
                return;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
        };

        for event in session.feed(&buf[..n], &identity) {
            match event {
                IngestEvent::Reply(reply) => {
                    let write = tokio::time::timeout(idle_timeout, stream.write_all(&reply)).await;
                    if !matches!(write, Ok(Ok(()))) {
                        debug!(%peer, "Could not deliver PJL reply");
                    }
                }
                IngestEvent::Job(payload) => {
                    persist(&catalog, peer, payload, JobStatus::Completed).await;
                }
            }
        }
    }

    if let Some(payload) = session.finish() {
        persist(&catalog, peer, payload, JobStatus::Completed).await;
    }
    debug!(%peer, jobs = session.jobs_seen(), "Ingest connection closed");
}

async fn persist(catalog: &Arc<dyn JobCatalog>, peer: SocketAddr, payload: Vec<u8>, status: JobStatus) {
    let size = payload.len();
    if let Err(e) = catalog.append(JobDraft::new(peer, payload, status)).await {
        // Only this job is lost; the responder keeps accepting.
        error!(%peer, bytes = size, error = %e, "Failed to record job");
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum IngestEvent {
    /// Bytes to send back immediately (PJL query answers)
    Reply(Vec<u8>),
    /// A complete job, ready to classify and persist
    Job(Vec<u8>),
}

/// Byte-stream state machine for one connection, independent of the socket.
#[derive(Debug, Default)]
pub struct IngestSession {
    pending: Vec<u8>,
    cursor: usize,
    at_line_start: bool,
    has_document: bool,
    jobs_seen: u64,
}

impl IngestSession {
    pub fn new() -> Self {
        Self {
            at_line_start: true,
            ..Default::default()
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn jobs_seen(&self) -> u64 {
        self.jobs_seen
    }

    pub fn feed(&mut self, data: &[u8], identity: &IdentitySnapshot) -> Vec<IngestEvent> {
        self.pending.extend_from_slice(data);
        let mut events = Vec::new();

        while self.cursor < self.pending.len() {
            let rest = &self.pending[self.cursor..];

            if rest.starts_with(UEL) {
                self.cursor += UEL.len();
                self.at_line_start = true;
                if self.has_document {
                    let job: Vec<u8> = self.pending.drain(..self.cursor).collect();
                    self.cursor = 0;
                    self.has_document = false;
                    self.jobs_seen += 1;
                    events.push(IngestEvent::Job(job));
                }
                continue;
            }
            if UEL.starts_with(rest) {
                break; // partial UEL, wait for more bytes
            }

            if self.at_line_start && !self.has_document {
                if rest.starts_with(PJL_PREFIX) {
                    match rest.iter().position(|&b| b == b'\n') {
                        Some(end) => {
                            let line = String::from_utf8_lossy(&rest[..end]).into_owned();
                            self.cursor += end + 1;
                            if let Some(reply) = pjl::respond(&line, identity, self.jobs_seen + 1) {
                                events.push(IngestEvent::Reply(reply.into_bytes()));
                            }
                            continue;
                        }
                        None if rest.len() < MAX_PJL_LINE => break,
                        None => {}
                    }
                } else if PJL_PREFIX.starts_with(rest) {
                    break;
                }
            }

            // Document bytes through the next newline, or up to the next ESC.
            let mut span = rest.len();
            for (i, &b) in rest.iter().enumerate() {
                if b == b'\n' {
                    span = i + 1;
                    break;
                }
                if b == 0x1b && i > 0 {
                    span = i;
                    break;
                }
            }
            let chunk = &rest[..span];
            if chunk.iter().any(|b| !b.is_ascii_whitespace()) {
                self.has_document = true;
            }
            self.at_line_start = chunk.last() == Some(&b'\n');
            self.cursor += span;
        }

        events
    }

    /// Called at client EOF: the remaining bytes form the last job unless
    /// they were control-only.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let pending = std::mem::take(&mut self.pending);
        self.cursor = 0;
        if is_control_only(&pending) {
            return None;
        }
        self.jobs_seen += 1;
        Some(pending)
    }

    /// Payload received before a transport error, if any document bytes arrived.
    pub fn take_partial(&mut self) -> Option<Vec<u8>> {
        self.finish()
    }
}
