// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`devsim-core`)
//!
//! HTTP surface that translates operator requests into admin gateway calls.
//! No business logic lives here.
//!
//! | Module | Transport | Description |
//! |--------|-----------|-------------|
//! | [`api`] | HTTP (Axum) | JSON admin API: login, dashboard, job listing, preview and download |

pub mod api;
