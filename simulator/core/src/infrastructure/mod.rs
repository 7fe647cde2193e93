// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod catalog;
pub mod process;
pub mod responders;
pub mod run_files;

pub use catalog::FileJobCatalog;
pub use process::ProcessLauncher;
pub use run_files::RunFiles;
