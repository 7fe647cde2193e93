// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Job Catalog contract
//!
//! Append-only store of captured jobs. Exactly one process writes (the
//! job-ingest responder); any number of processes read (the admin gateway
//! in the master). Implemented by `crate::infrastructure::catalog::FileJobCatalog`.
//!
//! Invariants every implementation keeps:
//! - ids are assigned strictly increasing and are never reused
//! - a record is only visible after its artifact was durably written
//! - a record never changes after it is visible

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::File;

use crate::domain::job::{JobDraft, JobRecord};

#[async_trait]
pub trait JobCatalog: Send + Sync {
    /// Persist the artifact, then record the job. Returns the stored record.
    async fn append(&self, draft: JobDraft) -> Result<JobRecord, CatalogError>;

    /// All records in ascending id order
    async fn list(&self) -> Result<Vec<JobRecord>, CatalogError>;

    async fn get(&self, id: u64) -> Result<JobRecord, CatalogError>;

    /// Open the artifact backing a record for streaming.
    async fn open_artifact(&self, record: &JobRecord) -> Result<File, CatalogError>;
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Job {0} not found")]
    NotFound(u64),

    #[error("Artifact for job {id} is missing: {path:?}")]
    ArtifactNotFound { id: u64, path: PathBuf },

    #[error("Catalog write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("Catalog read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("Corrupt catalog entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}
