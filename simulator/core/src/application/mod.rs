// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod admin_gateway;
pub mod session_service;
pub mod supervisor;

pub use admin_gateway::{AdminError, AdminGateway, Dashboard, JobDownload, JobView};
pub use session_service::SessionService;
pub use supervisor::{StartOutcome, Supervisor};
