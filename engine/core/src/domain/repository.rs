// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Ports
//!
//! Durable metadata store contracts. Backends must preserve the filter
//! engine's DNF semantics; a backend that cannot push a clause down must
//! return a superset and let the engine post-filter. All operations are
//! idempotent with respect to repeated success.
//!
//! The configuration repository is a separate key/value store for tenant
//! configuration (user credentials, feature config) — independent of the
//! node graph.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::AntboxError;
use crate::domain::filter::NodeFilters;
use crate::domain::node::Node;

/// One page of filter results. Page tokens are 1-based.
#[derive(Debug, Clone)]
pub struct NodeFilterResult {
    pub nodes: Vec<Node>,
    pub page_size: usize,
    pub page_token: usize,
}

/// Durable node metadata store
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Fails with `DuplicatedNode` on `uuid` or `fid` conflict
    async fn add(&self, node: &Node) -> Result<(), AntboxError>;

    async fn get_by_uuid(&self, uuid: &str) -> Result<Node, AntboxError>;

    async fn get_by_fid(&self, fid: &str) -> Result<Node, AntboxError>;

    /// Requires the node to exist
    async fn update(&self, node: &Node) -> Result<(), AntboxError>;

    /// Requires the node to exist
    async fn delete(&self, uuid: &str) -> Result<(), AntboxError>;

    async fn filter(
        &self,
        filters: &NodeFilters,
        page_size: usize,
        page_token: usize,
    ) -> Result<NodeFilterResult, AntboxError>;

    // ------------------------------------------------------------------
    // Optional vector extension
    // ------------------------------------------------------------------

    fn supports_embeddings(&self) -> bool {
        false
    }

    async fn upsert_embedding(&self, _uuid: &str, _embedding: &[f32]) -> Result<(), AntboxError> {
        Err(AntboxError::BadRequest(
            "backend does not support embeddings".into(),
        ))
    }

    /// Results ordered by score descending
    async fn vector_search(
        &self,
        _embedding: &[f32],
        _top_k: usize,
    ) -> Result<Vec<(Node, f32)>, AntboxError> {
        Err(AntboxError::BadRequest(
            "backend does not support embeddings".into(),
        ))
    }

    async fn delete_embedding(&self, _uuid: &str) -> Result<(), AntboxError> {
        Ok(())
    }
}

/// Tenant key/value configuration store
#[async_trait]
pub trait ConfigurationRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, AntboxError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), AntboxError>;

    async fn delete(&self, key: &str) -> Result<(), AntboxError>;

    /// All entries whose key starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, AntboxError>;
}
