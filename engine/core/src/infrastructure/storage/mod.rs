// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Storage Provider Implementations
//!
//! Blob store adapters behind the `StorageProvider` port. The in-memory
//! provider backs unit tests; the local filesystem provider is the
//! single-node production-shaped adapter. Providers that mirror folder
//! trees (remote drives) subscribe to node events via `start_listeners`
//! and stay eventually consistent.

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::errors::AntboxError;
use crate::domain::storage::{StorageProvider, WriteOptions};

/// In-memory blob store for development and testing
#[derive(Clone, Default)]
pub struct InMemoryStorageProvider {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl InMemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorageProvider {
    async fn write(
        &self,
        uuid: &str,
        content: Bytes,
        _options: Option<WriteOptions>,
    ) -> Result<(), AntboxError> {
        self.blobs
            .write()
            .unwrap()
            .insert(uuid.to_string(), content);
        Ok(())
    }

    async fn read(&self, uuid: &str) -> Result<Bytes, AntboxError> {
        self.blobs
            .read()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| AntboxError::NodeFileNotFound(uuid.to_string()))
    }

    async fn delete(&self, uuid: &str) -> Result<(), AntboxError> {
        if self.blobs.write().unwrap().remove(uuid).is_none() {
            return Err(AntboxError::NodeFileNotFound(uuid.to_string()));
        }
        Ok(())
    }
}
