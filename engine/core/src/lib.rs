// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # antbox-core
//!
//! The node-management kernel of the Antbox ECM engine. Every addressable
//! entity — files, folders, smart folders, aspects, users, groups, API
//! keys, agents, workflows, features — is a node sharing a common metadata
//! envelope and identity scheme; a central `NodeService` mediates every
//! operation, and the surrounding subsystems (WebDAV, CMIS, the HTTP/JSON
//! API, the workflow engine) are clients of that core.
//!
//! ## Layer Structure
//!
//! ```text
//! presentation/   ← HTTP/JSON API, WebDAV, CMIS Browser Binding (axum)
//!     ↓
//! application/    ← NodeService kernel, path resolver, workflow engine,
//!                   audit trail, tenant registry
//!     ↓
//! domain/         ← node model, aspects, filters, permissions, errors,
//!                   events, port traits
//!     ↓
//! infrastructure/ ← in-memory + Postgres repositories, blob storage,
//!                   event bus, path cache
//! ```
//!
//! ## Integration Tests
//!
//! See `engine/core/tests/` for end-to-end scenarios covering the node
//! kernel, WebDAV path round-trips and the workflow engine.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
