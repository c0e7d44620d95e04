// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Storage Provider Port
//!
//! Opaque blob store keyed by node UUID. The provider is isolated from the
//! node graph: `WriteOptions` carries advisory parent/title hints for
//! providers that mirror the folder structure, and such providers may
//! subscribe to node events via `start_listeners` to reflect moves and
//! renames. Their sync is eventually consistent; the engine never waits
//! for provider-side effects before returning success.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::domain::errors::AntboxError;
use crate::domain::events::DomainEvent;

/// Advisory hints some providers use to mirror folder structure
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub parent: Option<String>,
    pub title: Option<String>,
}

/// Opaque blob store contract
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Creates or replaces the blob for `uuid`
    async fn write(
        &self,
        uuid: &str,
        content: Bytes,
        options: Option<WriteOptions>,
    ) -> Result<(), AntboxError>;

    async fn read(&self, uuid: &str) -> Result<Bytes, AntboxError>;

    async fn delete(&self, uuid: &str) -> Result<(), AntboxError>;

    /// Providers that mirror the folder tree subscribe to node events to
    /// reflect moves and renames. Default: no listeners.
    fn start_listeners(&self, _events: broadcast::Receiver<DomainEvent>) {}
}
