// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Audit Trail Persister
//!
//! Subscribes to the event bus and appends node lifecycle events to the
//! event store, keyed by `(node uuid, node mimetype)`. Runs as a
//! background task that never crashes the engine: persistence errors are
//! logged and the stream continues.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::domain::event_store::EventStore;
use crate::domain::events::DomainEvent;
use crate::infrastructure::event_bus::{EventBus, EventBusError};

pub struct AuditTrail {
    event_store: Arc<dyn EventStore>,
    bus: Arc<EventBus>,
    tenant: String,
}

impl AuditTrail {
    pub fn new(event_store: Arc<dyn EventStore>, bus: Arc<EventBus>, tenant: impl Into<String>) -> Self {
        Self {
            event_store,
            bus,
            tenant: tenant.into(),
        }
    }

    /// Spawn the persistence task. Subscription happens before the spawn
    /// so no event published after `start` returns can be missed.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(tenant = %self.tenant, "starting audit trail persister");
        let mut receiver = self.bus.subscribe();
        tokio::spawn(async move {
            let mut persisted = 0u64;
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(EventBusError::Closed) => {
                        info!(persisted, "audit trail persister shutting down");
                        return;
                    }
                    Err(EventBusError::Lagged(n)) => {
                        error!(dropped = n, "audit trail lost events to backpressure");
                        continue;
                    }
                    Err(EventBusError::Empty) => continue,
                };
                if event.tenant() != self.tenant {
                    continue;
                }

                let stream_id = event.stream_id().to_string();
                let mimetype = stream_mimetype(&event).to_string();
                let payload = match serde_json::to_value(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "failed to serialize event for audit");
                        continue;
                    }
                };
                match self.event_store.append(&stream_id, &mimetype, payload).await {
                    Ok(stored) => {
                        persisted += 1;
                        debug!(stream = %stream_id, sequence = stored.sequence, "audit event appended");
                    }
                    Err(e) => {
                        error!(stream = %stream_id, error = %e, "failed to append audit event");
                    }
                }
            }
        })
    }
}

fn stream_mimetype(event: &DomainEvent) -> &str {
    match event {
        DomainEvent::NodeCreated(e) => &e.mimetype,
        DomainEvent::NodeUpdated(e) => &e.mimetype,
        DomainEvent::NodeDeleted(e) => &e.mimetype,
        DomainEvent::UserCreated { .. } | DomainEvent::UserDeleted { .. } => {
            crate::domain::system::mimetypes::USER
        }
        DomainEvent::WorkflowStarted { .. } | DomainEvent::WorkflowTransitioned { .. } => {
            crate::domain::system::mimetypes::WORKFLOW
        }
    }
}
