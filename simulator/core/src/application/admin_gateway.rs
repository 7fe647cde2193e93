// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Admin Gateway
//!
//! Read-only operator view over the job catalog. Every query takes a session
//! token and is rejected with `Unauthenticated` unless the session service
//! knows it. The gateway never writes to the catalog.

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::application::session_service::SessionService;
use crate::domain::catalog::{CatalogError, JobCatalog};
use crate::domain::job::{JobRecord, JobStatus};
use crate::domain::session::{Session, SessionError, SessionToken};

pub const DEFAULT_PREVIEW_BYTES: usize = 512;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Invalid username or password")]
    AuthError,

    #[error("Missing, unknown or revoked session token")]
    Unauthenticated,

    #[error("Job {0} not found")]
    NotFound(u64),

    #[error("Artifact for job {0} is missing")]
    ArtifactNotFound(u64),

    #[error("Catalog error: {0}")]
    Catalog(CatalogError),
}

impl From<SessionError> for AdminError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AuthError | SessionError::InvalidHash(_) => AdminError::AuthError,
            SessionError::Unauthenticated => AdminError::Unauthenticated,
        }
    }
}

impl From<CatalogError> for AdminError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => AdminError::NotFound(id),
            CatalogError::ArtifactNotFound { id, .. } => AdminError::ArtifactNotFound(id),
            other => AdminError::Catalog(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dashboard {
    pub job_count: usize,
    pub total_pages: u64,
    pub total_bytes: u64,
    pub failed_jobs: usize,
    /// Keyed by document kind name (`PDF`, `PostScript`, ...)
    pub by_kind: BTreeMap<String, usize>,
    pub last_job: Option<JobRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPreview {
    pub hex: String,
    /// Lossy UTF-8 rendering of the same bytes
    pub text: String,
    /// Whether the artifact is longer than the preview
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub record: JobRecord,
    /// `None` when the artifact is gone; the record itself is still served.
    pub preview: Option<ArtifactPreview>,
}

pub struct JobDownload {
    pub record: JobRecord,
    pub content_type: &'static str,
    pub file_name: String,
    pub file: File,
}

pub struct AdminGateway {
    sessions: Arc<SessionService>,
    catalog: Arc<dyn JobCatalog>,
    preview_bytes: usize,
}

impl AdminGateway {
    pub fn new(sessions: Arc<SessionService>, catalog: Arc<dyn JobCatalog>) -> Self {
        Self {
            sessions,
            catalog,
            preview_bytes: DEFAULT_PREVIEW_BYTES,
        }
    }

    pub fn with_preview_bytes(mut self, bytes: usize) -> Self {
        self.preview_bytes = bytes;
        self
    }

    pub fn login(
        &self,
        username: &str,
        password: &str,
        remote: Option<SocketAddr>,
    ) -> Result<Session, AdminError> {
        Ok(self.sessions.login(username, password, remote)?)
    }

    pub fn logout(&self, token: &SessionToken) {
        self.sessions.logout(token);
    }

    fn authorize(&self, token: &SessionToken) -> Result<Session, AdminError> {
        Ok(self.sessions.validate(token)?)
    }

    pub async fn dashboard(&self, token: &SessionToken) -> Result<Dashboard, AdminError> {
        self.authorize(token)?;
        let records = self.catalog.list().await?;

        let mut dashboard = Dashboard {
            job_count: records.len(),
            ..Default::default()
        };
        for record in &records {
            dashboard.total_pages += u64::from(record.page_estimate);
            dashboard.total_bytes += record.size_bytes;
            if record.status == JobStatus::Failed {
                dashboard.failed_jobs += 1;
            }
            *dashboard.by_kind.entry(record.kind.to_string()).or_default() += 1;
        }
        dashboard.last_job = records.into_iter().last();
        Ok(dashboard)
    }

    pub async fn jobs(&self, token: &SessionToken) -> Result<Vec<JobRecord>, AdminError> {
        self.authorize(token)?;
        Ok(self.catalog.list().await?)
    }

    pub async fn view(&self, token: &SessionToken, id: u64) -> Result<JobView, AdminError> {
        self.authorize(token)?;
        let record = self.catalog.get(id).await?;

        let preview = match self.catalog.open_artifact(&record).await {
            Ok(file) => Some(self.preview(file, &record).await?),
            Err(CatalogError::ArtifactNotFound { path, .. }) => {
                warn!(id, ?path, "Artifact missing, serving record without preview");
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(JobView { record, preview })
    }

    pub async fn download(&self, token: &SessionToken, id: u64) -> Result<JobDownload, AdminError> {
        self.authorize(token)?;
        let record = self.catalog.get(id).await?;
        let file = self.catalog.open_artifact(&record).await?;
        debug!(id, "Streaming artifact");

        let file_name = record
            .artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("job_{}.{}", record.id, record.kind.extension()));
        Ok(JobDownload {
            content_type: record.kind.content_type(),
            file_name,
            record,
            file,
        })
    }

    async fn preview(&self, file: File, record: &JobRecord) -> Result<ArtifactPreview, AdminError> {
        let mut head = Vec::with_capacity(self.preview_bytes.min(64 * 1024));
        file.take(self.preview_bytes as u64)
            .read_to_end(&mut head)
            .await
            .map_err(|e| AdminError::Catalog(CatalogError::Read(e)))?;

        Ok(ArtifactPreview {
            hex: hex::encode(&head),
            text: String::from_utf8_lossy(&head).into_owned(),
            truncated: record.size_bytes > head.len() as u64,
        })
    }
}
