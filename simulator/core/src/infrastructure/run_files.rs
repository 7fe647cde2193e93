// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Run directory files: the master lock and the child list.
//!
//! ```text
//! <run_dir>/
//!   devsim.lock        LockRecord (JSON), created exclusively
//!   children.json      [ChildEntry] (JSON), replaced atomically
//!   logs/<id>.log      per-process log files
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::domain::supervisor::{ChildEntry, LockRecord, RunFileError};

pub const LOCK_FILE: &str = "devsim.lock";
pub const CHILDREN_FILE: &str = "children.json";
pub const LOG_DIR: &str = "logs";

#[derive(Debug, Clone)]
pub struct RunFiles {
    run_dir: PathBuf,
}

impl RunFiles {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.run_dir.join(LOCK_FILE)
    }

    pub fn children_path(&self) -> PathBuf {
        self.run_dir.join(CHILDREN_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.run_dir.join(LOG_DIR)
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.log_dir().join(format!("{}.log", id))
    }

    pub fn ensure_dirs(&self) -> Result<(), RunFileError> {
        let log_dir = self.log_dir();
        fs::create_dir_all(&log_dir).map_err(|source| RunFileError::Io {
            path: log_dir,
            source,
        })
    }

    pub fn read_lock(&self) -> Result<Option<LockRecord>, RunFileError> {
        read_json(&self.lock_path())
    }

    /// Create the lock exclusively. Fails with `LockExists` if another start won the race.
    pub fn create_lock(&self, record: &LockRecord) -> Result<(), RunFileError> {
        let path = self.lock_path();
        let mut file = match open_new(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RunFileError::LockExists(path));
            }
            Err(source) => return Err(RunFileError::Io { path, source }),
        };

        let bytes = serde_json::to_vec_pretty(record).map_err(|source| RunFileError::Malformed {
            path: path.clone(),
            source,
        })?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|source| RunFileError::Io { path, source })
    }

    pub fn remove_lock(&self) -> Result<(), RunFileError> {
        remove_if_exists(&self.lock_path())
    }

    pub fn read_children(&self) -> Result<Vec<ChildEntry>, RunFileError> {
        Ok(read_json(&self.children_path())?.unwrap_or_default())
    }

    /// Replace the child list via write-to-temp then rename.
    pub fn write_children(&self, children: &[ChildEntry]) -> Result<(), RunFileError> {
        let path = self.children_path();
        let tmp = self.run_dir.join(format!("{}.tmp", CHILDREN_FILE));
        let bytes = serde_json::to_vec_pretty(children).map_err(|source| RunFileError::Malformed {
            path: path.clone(),
            source,
        })?;

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            fs::File::open(&self.run_dir)?.sync_all()
        };
        write().map_err(|source| RunFileError::Io {
            path: path.clone(),
            source,
        })
    }

    pub fn remove_children(&self) -> Result<(), RunFileError> {
        remove_if_exists(&self.children_path())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, RunFileError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(RunFileError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| RunFileError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

fn remove_if_exists(path: &Path) -> Result<(), RunFileError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RunFileError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(unix)]
fn open_new(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_new(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}
