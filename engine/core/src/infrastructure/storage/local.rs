// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Filesystem Storage Provider
//!
//! Stores blobs as flat files keyed by node UUID under a base directory.
//! Suitable for single-node deployments and integration testing; not for
//! multi-node clusters.
//!
//! **Limitations:**
//! - No replication or high availability
//! - Advisory parent/title write hints are ignored (nothing mirrors the
//!   folder tree on a flat local disk)

use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

use crate::domain::errors::AntboxError;
use crate::domain::storage::{StorageProvider, WriteOptions};

/// Local filesystem blob store
pub struct LocalStorageProvider {
    /// Base directory for all blobs (e.g. "/var/lib/antbox/blobs")
    base_path: PathBuf,
}

impl LocalStorageProvider {
    /// Create a provider rooted at `base_path`, creating the directory and
    /// probing writability up front so misconfiguration fails fast.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, AntboxError> {
        let base_path = base_path.into();

        std::fs::create_dir_all(&base_path).map_err(|e| {
            AntboxError::Unknown(format!(
                "failed to create base directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let probe = base_path.join(".antbox-storage-probe");
        std::fs::write(&probe, b"probe").map_err(|e| {
            AntboxError::Unknown(format!(
                "base directory {} is not writable: {}",
                base_path.display(),
                e
            ))
        })?;
        std::fs::remove_file(&probe)
            .map_err(|e| AntboxError::Unknown(format!("failed to clean up probe file: {e}")))?;

        Ok(Self { base_path })
    }

    fn blob_path(&self, uuid: &str) -> PathBuf {
        self.base_path.join(uuid)
    }
}

#[async_trait]
impl StorageProvider for LocalStorageProvider {
    async fn write(
        &self,
        uuid: &str,
        content: Bytes,
        _options: Option<WriteOptions>,
    ) -> Result<(), AntboxError> {
        let path = self.blob_path(uuid);
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| AntboxError::Unknown(format!("failed to write blob {uuid}: {e}")))
    }

    async fn read(&self, uuid: &str) -> Result<Bytes, AntboxError> {
        let path = self.blob_path(uuid);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AntboxError::NodeFileNotFound(uuid.to_string()))
            }
            Err(e) => Err(AntboxError::Unknown(format!(
                "failed to read blob {uuid}: {e}"
            ))),
        }
    }

    async fn delete(&self, uuid: &str) -> Result<(), AntboxError> {
        let path = self.blob_path(uuid);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AntboxError::NodeFileNotFound(uuid.to_string()))
            }
            Err(e) => Err(AntboxError::Unknown(format!(
                "failed to delete blob {uuid}: {e}"
            ))),
        }
    }
}
