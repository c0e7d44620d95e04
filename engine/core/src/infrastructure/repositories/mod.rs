// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the ports defined in the domain
//! layer, following the Repository pattern.
//!
//! # Available Implementations
//!
//! ## PostgreSQL
//!
//! Production persistence:
//! - **PostgresNodeRepository** — node metadata with promoted columns and a
//!   JSONB envelope; DNF filters are pushed down where possible and
//!   post-filtered by the engine otherwise
//! - **PostgresEventStore** — append-only audit streams with serialized
//!   per-stream sequence assignment
//!
//! ## In-Memory
//!
//! Lightweight implementations for development and testing. The in-memory
//! node repository is the canonical reference for filter semantics and
//! also implements the optional vector extension (cosine similarity).

pub mod postgres_event_store;
pub mod postgres_node;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::errors::AntboxError;
use crate::domain::event_store::{EventStore, StoredEvent};
use crate::domain::filter::NodeFilters;
use crate::domain::node::Node;
use crate::domain::repository::{ConfigurationRepository, NodeFilterResult, NodeRepository};
use crate::domain::workflow::{WorkflowInstance, WorkflowInstanceRepository};

// ============================================================================
// Nodes
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryNodeRepository {
    nodes: Arc<RwLock<HashMap<String, Node>>>,
    embeddings: Arc<RwLock<HashMap<String, Vec<f32>>>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn add(&self, node: &Node) -> Result<(), AntboxError> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.contains_key(&node.uuid) {
            return Err(AntboxError::DuplicatedNode(node.uuid.clone()));
        }
        if !node.fid.is_empty() && nodes.values().any(|n| n.fid == node.fid) {
            return Err(AntboxError::DuplicatedNode(node.fid.clone()));
        }
        nodes.insert(node.uuid.clone(), node.clone());
        Ok(())
    }

    async fn get_by_uuid(&self, uuid: &str) -> Result<Node, AntboxError> {
        self.nodes
            .read()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| AntboxError::NodeNotFound(uuid.to_string()))
    }

    async fn get_by_fid(&self, fid: &str) -> Result<Node, AntboxError> {
        self.nodes
            .read()
            .unwrap()
            .values()
            .find(|n| n.fid == fid)
            .cloned()
            .ok_or_else(|| AntboxError::NodeNotFound(fid.to_string()))
    }

    async fn update(&self, node: &Node) -> Result<(), AntboxError> {
        let mut nodes = self.nodes.write().unwrap();
        if !nodes.contains_key(&node.uuid) {
            return Err(AntboxError::NodeNotFound(node.uuid.clone()));
        }
        nodes.insert(node.uuid.clone(), node.clone());
        Ok(())
    }

    async fn delete(&self, uuid: &str) -> Result<(), AntboxError> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.remove(uuid).is_none() {
            return Err(AntboxError::NodeNotFound(uuid.to_string()));
        }
        self.embeddings.write().unwrap().remove(uuid);
        Ok(())
    }

    async fn filter(
        &self,
        filters: &NodeFilters,
        page_size: usize,
        page_token: usize,
    ) -> Result<NodeFilterResult, AntboxError> {
        let page_size = page_size.max(1);
        let page_token = page_token.max(1);

        let mut matched: Vec<Node> = {
            let nodes = self.nodes.read().unwrap();
            nodes
                .values()
                .filter(|n| filters.is_satisfied_by(&n.metadata()))
                .cloned()
                .collect()
        };
        matched.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });

        let start = (page_token - 1) * page_size;
        let nodes = matched.into_iter().skip(start).take(page_size).collect();
        Ok(NodeFilterResult {
            nodes,
            page_size,
            page_token,
        })
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    async fn upsert_embedding(&self, uuid: &str, embedding: &[f32]) -> Result<(), AntboxError> {
        if !self.nodes.read().unwrap().contains_key(uuid) {
            return Err(AntboxError::NodeNotFound(uuid.to_string()));
        }
        self.embeddings
            .write()
            .unwrap()
            .insert(uuid.to_string(), embedding.to_vec());
        Ok(())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Node, f32)>, AntboxError> {
        let nodes = self.nodes.read().unwrap();
        let embeddings = self.embeddings.read().unwrap();
        let mut scored: Vec<(Node, f32)> = embeddings
            .iter()
            .filter_map(|(uuid, vec)| {
                nodes
                    .get(uuid)
                    .map(|node| (node.clone(), cosine_similarity(embedding, vec)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_embedding(&self, uuid: &str) -> Result<(), AntboxError> {
        self.embeddings.write().unwrap().remove(uuid);
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryConfigurationRepository {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryConfigurationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigurationRepository for InMemoryConfigurationRepository {
    async fn get(&self, key: &str) -> Result<Option<Value>, AntboxError> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), AntboxError> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AntboxError> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, AntboxError> {
        let entries = self.entries.read().unwrap();
        let mut listed: Vec<(String, Value)> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(listed)
    }
}

// ============================================================================
// Event store
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<(String, String), Vec<StoredEvent>>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        mimetype: &str,
        payload: Value,
    ) -> Result<StoredEvent, AntboxError> {
        let mut streams = self.streams.write().unwrap();
        let stream = streams
            .entry((stream_id.to_string(), mimetype.to_string()))
            .or_default();
        // Sequence assignment is atomic under the write lock: next = len
        let event = StoredEvent {
            stream_id: stream_id.to_string(),
            mimetype: mimetype.to_string(),
            sequence: stream.len() as u64,
            payload,
            recorded_at: chrono::Utc::now(),
        };
        stream.push(event.clone());
        Ok(event)
    }

    async fn get_stream(
        &self,
        stream_id: &str,
        mimetype: &str,
    ) -> Result<Vec<StoredEvent>, AntboxError> {
        Ok(self
            .streams
            .read()
            .unwrap()
            .get(&(stream_id.to_string(), mimetype.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_streams_by_mimetype(
        &self,
        mimetype: &str,
    ) -> Result<HashMap<String, Vec<StoredEvent>>, AntboxError> {
        let streams = self.streams.read().unwrap();
        Ok(streams
            .iter()
            .filter(|((_, m), _)| m == mimetype)
            .map(|((id, _), events)| (id.clone(), events.clone()))
            .collect())
    }
}

// ============================================================================
// Workflow instances
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemoryWorkflowInstanceRepository {
    instances: Arc<RwLock<HashMap<String, WorkflowInstance>>>,
}

impl InMemoryWorkflowInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowInstanceRepository for InMemoryWorkflowInstanceRepository {
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), AntboxError> {
        self.instances
            .write()
            .unwrap()
            .insert(instance.uuid.clone(), instance.clone());
        Ok(())
    }

    async fn get_by_uuid(&self, uuid: &str) -> Result<WorkflowInstance, AntboxError> {
        self.instances
            .read()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| AntboxError::NodeNotFound(uuid.to_string()))
    }

    async fn find_by_node(&self, node_uuid: &str) -> Result<Option<WorkflowInstance>, AntboxError> {
        Ok(self
            .instances
            .read()
            .unwrap()
            .values()
            .find(|i| i.node_uuid == node_uuid && i.running)
            .cloned())
    }

    async fn find_running(&self) -> Result<Vec<WorkflowInstance>, AntboxError> {
        Ok(self
            .instances
            .read()
            .unwrap()
            .values()
            .filter(|i| i.running)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filter::{parse, FilterOperator, NodeFilter, NodeFilters};
    use crate::domain::system::mimetypes;
    use serde_json::json;

    fn node(uuid: &str, fid: &str, title: &str, parent: &str) -> Node {
        let mut n = Node::scaffold(uuid, title, mimetypes::FOLDER);
        n.fid = fid.to_string();
        n.parent = parent.to_string();
        n.owner = "alice@example.com".to_string();
        n
    }

    #[tokio::test]
    async fn test_add_and_duplicate_detection() {
        let repo = InMemoryNodeRepository::new();
        repo.add(&node("folder-0001", "docs", "Docs", "--root--"))
            .await
            .unwrap();

        let same_uuid = node("folder-0001", "other", "Other", "--root--");
        assert!(matches!(
            repo.add(&same_uuid).await,
            Err(AntboxError::DuplicatedNode(_))
        ));

        let same_fid = node("folder-0002", "docs", "Other", "--root--");
        assert!(matches!(
            repo.add(&same_fid).await,
            Err(AntboxError::DuplicatedNode(_))
        ));
    }

    #[tokio::test]
    async fn test_get_by_uuid_and_fid() {
        let repo = InMemoryNodeRepository::new();
        repo.add(&node("folder-0001", "docs", "Docs", "--root--"))
            .await
            .unwrap();

        assert_eq!(repo.get_by_uuid("folder-0001").await.unwrap().title, "Docs");
        assert_eq!(repo.get_by_fid("docs").await.unwrap().uuid, "folder-0001");
        assert!(matches!(
            repo.get_by_uuid("missing-0001").await,
            Err(AntboxError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_filter_and_paging() {
        let repo = InMemoryNodeRepository::new();
        for i in 0..5i64 {
            let mut n = node(
                &format!("folder-000{i}"),
                &format!("f-{i}"),
                &format!("Folder {i}"),
                "--root--",
            );
            n.created_time = chrono::Utc::now() + chrono::Duration::seconds(i);
            repo.add(&n).await.unwrap();
        }

        let filters = parse(r#"parent == "--root--""#).unwrap();
        let page1 = repo.filter(&filters, 2, 1).await.unwrap();
        assert_eq!(page1.nodes.len(), 2);
        assert_eq!(page1.page_token, 1);
        let page3 = repo.filter(&filters, 2, 3).await.unwrap();
        assert_eq!(page3.nodes.len(), 1);

        let none = repo
            .filter(
                &NodeFilters::And(vec![NodeFilter::new(
                    "parent",
                    FilterOperator::Equal,
                    json!("--other--"),
                )]),
                25,
                1,
            )
            .await
            .unwrap();
        assert!(none.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_ordering() {
        let repo = InMemoryNodeRepository::new();
        repo.add(&node("folder-0001", "a", "A", "--root--"))
            .await
            .unwrap();
        repo.add(&node("folder-0002", "b", "B", "--root--"))
            .await
            .unwrap();
        repo.add(&node("folder-0003", "c", "C", "--root--"))
            .await
            .unwrap();

        assert!(repo.supports_embeddings());
        repo.upsert_embedding("folder-0001", &[1.0, 0.0]).await.unwrap();
        repo.upsert_embedding("folder-0002", &[0.7, 0.7]).await.unwrap();
        repo.upsert_embedding("folder-0003", &[0.0, 1.0]).await.unwrap();

        let results = repo.vector_search(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0.uuid, "folder-0001");
        assert!(results[0].1 >= results[1].1 && results[1].1 >= results[2].1);

        let top2 = repo.vector_search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(top2.len(), 2);
    }

    #[tokio::test]
    async fn test_event_store_sequences() {
        let store = InMemoryEventStore::new();
        for i in 0..3 {
            let event = store
                .append("node-0001", "text/plain", json!({"i": i}))
                .await
                .unwrap();
            assert_eq!(event.sequence, i);
        }
        let stream = store.get_stream("node-0001", "text/plain").await.unwrap();
        let sequences: Vec<u64> = stream.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);

        store
            .append("node-0002", "text/plain", json!({}))
            .await
            .unwrap();
        let by_kind = store.get_streams_by_mimetype("text/plain").await.unwrap();
        assert_eq!(by_kind.len(), 2);
    }

    #[tokio::test]
    async fn test_configuration_repository() {
        let repo = InMemoryConfigurationRepository::new();
        repo.put("credentials:alice@example.com", json!({"digest": "abc"}))
            .await
            .unwrap();
        repo.put("credentials:bob@example.com", json!({"digest": "def"}))
            .await
            .unwrap();
        repo.put("features:ocr", json!({"enabled": true}))
            .await
            .unwrap();

        assert!(repo
            .get("credentials:alice@example.com")
            .await
            .unwrap()
            .is_some());
        let creds = repo.list("credentials:").await.unwrap();
        assert_eq!(creds.len(), 2);

        repo.delete("features:ocr").await.unwrap();
        assert!(repo.get("features:ocr").await.unwrap().is_none());
    }
}
