// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model
//!
//! Types and contracts shared by every process of the simulator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Identity snapshot, config manifest, job records, sessions,
//!   the responder contract and supervisor state

pub mod catalog;
pub mod device_config;
pub mod identity;
pub mod job;
pub mod responder;
pub mod session;
pub mod supervisor;
