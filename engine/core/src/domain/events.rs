// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain Events
//!
//! Node lifecycle and domain events published on the in-process bus.
//! `NodeCreated` is published only after the repository write is durable.
//! `NodeUpdated` carries the changed fields plus enough context (old
//! parent, title change) for the path cache to invalidate precisely;
//! `NodeDeleted` carries the full deleted node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCreatedEvent {
    pub tenant: String,
    pub uuid: String,
    pub mimetype: String,
    pub parent: String,
    pub title: String,
    /// Full metadata document of the created node
    pub metadata: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUpdatedEvent {
    pub tenant: String,
    pub uuid: String,
    pub mimetype: String,
    pub parent: String,
    /// Set when the update moved the node
    pub old_parent: Option<String>,
    pub title_changed: bool,
    /// Only the changed fields, plus `uuid`
    pub changed: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDeletedEvent {
    pub tenant: String,
    pub uuid: String,
    pub mimetype: String,
    pub parent: String,
    /// Full metadata document of the deleted node
    pub node: Value,
    pub occurred_at: DateTime<Utc>,
}

/// Unified event type for the engine bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    NodeCreated(NodeCreatedEvent),
    NodeUpdated(NodeUpdatedEvent),
    NodeDeleted(NodeDeletedEvent),
    UserCreated {
        tenant: String,
        uuid: String,
        email: String,
        occurred_at: DateTime<Utc>,
    },
    UserDeleted {
        tenant: String,
        uuid: String,
        email: String,
        occurred_at: DateTime<Utc>,
    },
    WorkflowStarted {
        tenant: String,
        instance_uuid: String,
        node_uuid: String,
        definition_uuid: String,
        occurred_at: DateTime<Utc>,
    },
    WorkflowTransitioned {
        tenant: String,
        instance_uuid: String,
        node_uuid: String,
        signal: String,
        from_state: String,
        to_state: String,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn tenant(&self) -> &str {
        match self {
            DomainEvent::NodeCreated(e) => &e.tenant,
            DomainEvent::NodeUpdated(e) => &e.tenant,
            DomainEvent::NodeDeleted(e) => &e.tenant,
            DomainEvent::UserCreated { tenant, .. } => tenant,
            DomainEvent::UserDeleted { tenant, .. } => tenant,
            DomainEvent::WorkflowStarted { tenant, .. } => tenant,
            DomainEvent::WorkflowTransitioned { tenant, .. } => tenant,
        }
    }

    /// Audit stream key: the node UUID the event is about
    pub fn stream_id(&self) -> &str {
        match self {
            DomainEvent::NodeCreated(e) => &e.uuid,
            DomainEvent::NodeUpdated(e) => &e.uuid,
            DomainEvent::NodeDeleted(e) => &e.uuid,
            DomainEvent::UserCreated { uuid, .. } => uuid,
            DomainEvent::UserDeleted { uuid, .. } => uuid,
            DomainEvent::WorkflowStarted { node_uuid, .. } => node_uuid,
            DomainEvent::WorkflowTransitioned { node_uuid, .. } => node_uuid,
        }
    }
}
