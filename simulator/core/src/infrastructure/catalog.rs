// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! File-backed [`JobCatalog`].
//!
//! One directory holds the raw artifacts plus `jobs.log`, a JSON Lines file
//! with one [`JobRecord`] per line. Appends are serialized by an async mutex;
//! the artifact is fsynced (file and directory) before its log line is
//! written, so a visible record always has its bytes on disk.
//!
//! Readers parse the log without the mutex and ignore a trailing line that
//! has no newline yet. The writer cuts such a torn tail off when it opens
//! the catalog, so the next append starts on a fresh line.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::catalog::{CatalogError, JobCatalog};
use crate::domain::job::{classify, JobDraft, JobRecord};

pub const JOB_LOG: &str = "jobs.log";

pub struct FileJobCatalog {
    dir: PathBuf,
    log_path: PathBuf,
    writer: Mutex<WriterState>,
    read_only: bool,
}

struct WriterState {
    next_id: u64,
}

impl FileJobCatalog {
    /// Open (creating if needed) the catalog directory and replay the log to
    /// continue the id sequence.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(CatalogError::Write)?;
        let log_path = dir.join(JOB_LOG);

        repair_tail(&log_path).await?;
        let records = read_log(&log_path).await?;
        let next_id = records.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        debug!(dir = ?dir, existing = records.len(), next_id, "Opened job catalog");

        Ok(Self {
            dir,
            log_path,
            writer: Mutex::new(WriterState { next_id }),
            read_only: false,
        })
    }

    /// Open for reading next to a writer in another process. The log is left
    /// untouched and `append` is refused.
    pub async fn open_read_only(dir: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(CatalogError::Write)?;
        let log_path = dir.join(JOB_LOG);
        debug!(dir = ?dir, "Opened job catalog read-only");

        Ok(Self {
            dir,
            log_path,
            writer: Mutex::new(WriterState { next_id: 0 }),
            read_only: true,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_location(&self, record: &JobRecord) -> PathBuf {
        self.dir.join(&record.artifact_path)
    }

    async fn write_artifact(&self, path: &Path, payload: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(payload).await?;
        file.sync_all().await?;
        File::open(&self.dir).await?.sync_all().await
    }

    async fn append_line(&self, line: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        let previous_len = file.metadata().await?.len();

        let result = async {
            file.write_all(line).await?;
            file.sync_data().await
        }
        .await;

        if result.is_err() {
            // Never leave a half-written line behind for the next append.
            let _ = file.set_len(previous_len).await;
        }
        result
    }
}

#[async_trait]
impl JobCatalog for FileJobCatalog {
    async fn append(&self, draft: JobDraft) -> Result<JobRecord, CatalogError> {
        if self.read_only {
            return Err(CatalogError::Write(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "job catalog is open read-only",
            )));
        }
        let mut state = self.writer.lock().await;
        let id = state.next_id;

        let classification = classify(&draft.payload);
        let file_name = format!(
            "job_{}_{}.{}",
            id,
            draft.received_at.format("%Y%m%d_%H%M%S"),
            classification.kind.extension()
        );
        let artifact = self.dir.join(&file_name);

        if let Err(e) = self.write_artifact(&artifact, &draft.payload).await {
            // An existing file of the same name belongs to someone else.
            if e.kind() != io::ErrorKind::AlreadyExists {
                let _ = fs::remove_file(&artifact).await;
            }
            return Err(CatalogError::Write(e));
        }

        let record = JobRecord {
            id,
            received_at: draft.received_at,
            source_address: draft.source_address,
            kind: classification.kind,
            page_estimate: classification.page_estimate,
            size_bytes: draft.payload.len() as u64,
            artifact_path: PathBuf::from(file_name),
            status: draft.status,
        };

        let mut line = serde_json::to_vec(&record)
            .map_err(|e| CatalogError::Write(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        line.push(b'\n');

        if let Err(e) = self.append_line(&line).await {
            warn!(id, error = %e, "Job log append failed, discarding artifact");
            let _ = fs::remove_file(&artifact).await;
            return Err(CatalogError::Write(e));
        }

        state.next_id += 1;
        metrics::counter!("devsim_jobs_ingested_total", "kind" => classification.kind.extension())
            .increment(1);
        info!(
            id,
            kind = %record.kind,
            pages = record.page_estimate,
            bytes = record.size_bytes,
            source = %record.source_address,
            "Job recorded"
        );
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<JobRecord>, CatalogError> {
        let mut records = read_log(&self.log_path).await?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn get(&self, id: u64) -> Result<JobRecord, CatalogError> {
        read_log(&self.log_path)
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(CatalogError::NotFound(id))
    }

    async fn open_artifact(&self, record: &JobRecord) -> Result<File, CatalogError> {
        let path = self.artifact_location(record);
        match File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CatalogError::ArtifactNotFound {
                id: record.id,
                path,
            }),
            Err(e) => Err(CatalogError::Read(e)),
        }
    }
}

/// Truncate `jobs.log` to just after its last newline.
async fn repair_tail(path: &Path) -> Result<(), CatalogError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CatalogError::Read(e)),
    };
    let keep = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |end| end + 1);
    if keep == bytes.len() {
        return Ok(());
    }

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(CatalogError::Write)?;
    file.set_len(keep as u64).await.map_err(CatalogError::Write)?;
    file.sync_all().await.map_err(CatalogError::Write)?;
    warn!(
        path = ?path,
        dropped_bytes = bytes.len() - keep,
        "Truncated torn job log tail"
    );
    Ok(())
}

async fn read_log(path: &Path) -> Result<Vec<JobRecord>, CatalogError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CatalogError::Read(e)),
    };
    parse_log(&bytes)
}

fn parse_log(bytes: &[u8]) -> Result<Vec<JobRecord>, CatalogError> {
    // Everything after the last newline is a write in progress.
    let complete = match bytes.iter().rposition(|&b| b == b'\n') {
        Some(end) => &bytes[..=end],
        None => return Ok(Vec::new()),
    };

    let mut records = Vec::new();
    for (index, line) in complete.split(|&b| b == b'\n').enumerate() {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        let record = serde_json::from_slice(line).map_err(|e| CatalogError::Corrupt {
            line: index + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{DocumentKind, JobStatus};

    fn draft(payload: &[u8]) -> JobDraft {
        JobDraft::new("192.0.2.10:50123".parse().unwrap(), payload.to_vec(), JobStatus::Completed)
    }

    #[tokio::test]
    async fn test_append_writes_artifact_then_record() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileJobCatalog::open(dir.path()).await.unwrap();

        let record = catalog.append(draft(b"%PDF-1.7\n<< /Type /Page >>")).await.unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.kind, DocumentKind::Pdf);
        assert_eq!(record.size_bytes, 26);
        assert!(record.artifact_path.to_string_lossy().starts_with("job_1_"));
        assert!(record.artifact_path.to_string_lossy().ends_with(".pdf"));

        let on_disk = std::fs::read(catalog.artifact_location(&record)).unwrap();
        assert_eq!(on_disk, b"%PDF-1.7\n<< /Type /Page >>");
        assert_eq!(catalog.get(1).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_reopen_continues_id_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = FileJobCatalog::open(dir.path()).await.unwrap();
            catalog.append(draft(b"one")).await.unwrap();
            catalog.append(draft(b"two")).await.unwrap();
        }

        let catalog = FileJobCatalog::open(dir.path()).await.unwrap();
        let third = catalog.append(draft(b"three")).await.unwrap();
        assert_eq!(third.id, 3);
        let ids: Vec<u64> = catalog.list().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_trailing_partial_line_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileJobCatalog::open(dir.path()).await.unwrap();
        catalog.append(draft(b"%!PS\nshowpage\n")).await.unwrap();

        let mut log = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(JOB_LOG))
            .unwrap();
        std::io::Write::write_all(&mut log, br#"{"id":2,"received_at":"#).unwrap();

        let records = catalog.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, DocumentKind::PostScript);
    }

    #[tokio::test]
    async fn test_reopen_repairs_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = FileJobCatalog::open(dir.path()).await.unwrap();
            catalog.append(draft(b"%!PS\nshowpage\n")).await.unwrap();
        }
        let log_path = dir.path().join(JOB_LOG);
        let intact_len = std::fs::metadata(&log_path).unwrap().len();
        let mut log = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
        std::io::Write::write_all(&mut log, br#"{"id":2,"received_at":"#).unwrap();
        drop(log);

        let catalog = FileJobCatalog::open(dir.path()).await.unwrap();
        assert_eq!(std::fs::metadata(&log_path).unwrap().len(), intact_len);

        let second = catalog.append(draft(b"%PDF-1.4\n/Type /Page\n")).await.unwrap();
        assert_eq!(second.id, 2);
        let ids: Vec<u64> = catalog.list().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(catalog.get(1).await.unwrap().kind, DocumentKind::PostScript);

        let reopened = FileJobCatalog::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_read_only_open_leaves_log_alone() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileJobCatalog::open(dir.path()).await.unwrap();
        writer.append(draft(b"%!PS\nshowpage\n")).await.unwrap();

        let log_path = dir.path().join(JOB_LOG);
        let mut log = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
        std::io::Write::write_all(&mut log, br#"{"id":2,"#).unwrap();
        let in_progress_len = std::fs::metadata(&log_path).unwrap().len();

        let reader = FileJobCatalog::open_read_only(dir.path()).await.unwrap();
        assert_eq!(std::fs::metadata(&log_path).unwrap().len(), in_progress_len);
        assert_eq!(reader.list().await.unwrap().len(), 1);
        assert!(matches!(
            reader.append(draft(b"nope")).await,
            Err(CatalogError::Write(_))
        ));
    }

    #[tokio::test]
    async fn test_colliding_artifact_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let stamped = |payload: &[u8]| {
            let mut draft = draft(payload);
            draft.received_at = "2026-03-01T09:30:00Z".parse().unwrap();
            draft
        };
        let catalog = FileJobCatalog::open(dir.path()).await.unwrap();
        let first = catalog.append(stamped(b"%!PS\nfirst\n")).await.unwrap();
        let artifact = catalog.artifact_location(&first);

        // Losing the log restarts the id sequence on the next open.
        std::fs::remove_file(dir.path().join(JOB_LOG)).unwrap();
        let catalog = FileJobCatalog::open(dir.path()).await.unwrap();

        match catalog.append(stamped(b"%!PS\nsecond\n")).await {
            Err(CatalogError::Write(e)) => assert_eq!(e.kind(), io::ErrorKind::AlreadyExists),
            other => panic!("expected a name collision, got {:?}", other),
        }
        assert_eq!(std::fs::read(&artifact).unwrap(), b"%!PS\nfirst\n");
        assert!(catalog.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_records_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileJobCatalog::open(dir.path()).await.unwrap();
        assert!(matches!(catalog.get(7).await, Err(CatalogError::NotFound(7))));

        let record = catalog.append(draft(b"\x1bE\x0c")).await.unwrap();
        std::fs::remove_file(catalog.artifact_location(&record)).unwrap();

        assert!(catalog.get(record.id).await.is_ok());
        assert!(matches!(
            catalog.open_artifact(&record).await,
            Err(CatalogError::ArtifactNotFound { id: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_write_does_not_consume_id() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileJobCatalog::open(dir.path()).await.unwrap();

        // A directory where the log should be makes the append fail.
        std::fs::create_dir(dir.path().join(JOB_LOG)).unwrap();
        assert!(matches!(
            catalog.append(draft(b"lost")).await,
            Err(CatalogError::Write(_))
        ));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("job_"))
            .collect();
        assert!(leftovers.is_empty());

        std::fs::remove_dir(dir.path().join(JOB_LOG)).unwrap();
        let record = catalog.append(draft(b"kept")).await.unwrap();
        assert_eq!(record.id, 1);
    }
}
