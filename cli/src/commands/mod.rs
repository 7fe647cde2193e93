// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the devsim CLI

use anyhow::Result;
use std::path::PathBuf;

use devsim_core::domain::device_config::{DeviceConfigManifest, StorageConfig};

pub mod config;
pub mod daemon;

pub use self::config::ConfigCommand;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub run_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub json: bool,
}

impl GlobalArgs {
    /// Run directory: `--run-dir` / `DEVSIM_RUN_DIR`, then the config's
    /// `storage.run_dir`, then the default. Always absolute.
    pub fn resolve_run_dir(&self) -> Result<PathBuf> {
        let run_dir = match &self.run_dir {
            Some(dir) => dir.clone(),
            None => self
                .config_path()
                .ok()
                .and_then(|path| DeviceConfigManifest::from_yaml_file(&path).ok())
                .map(|manifest| manifest.spec.storage.run_dir)
                .unwrap_or_else(|| StorageConfig::default().run_dir),
        };
        crate::daemon::absolute(&run_dir)
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        let path = DeviceConfigManifest::resolve_path(self.config.as_deref())?;
        crate::daemon::absolute(&path)
    }
}
