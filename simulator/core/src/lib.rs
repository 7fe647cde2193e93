// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # devsim core
//!
//! Runtime for simulating one network-attached device: protocol responders,
//! the job catalog they feed, the operator session layer and the process
//! supervisor that ties them together.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain types, application services, protocol responders and
//!   the admin HTTP surface

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
