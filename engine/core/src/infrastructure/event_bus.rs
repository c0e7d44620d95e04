// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory event streaming over tokio broadcast channels. Delivery is
// best-effort, synchronous to the publisher and unordered within a tick;
// handlers must be crash-safe and are never retried by the bus.
// Publication always happens after the durable repository write.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::events::DomainEvent;

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity. Capacity
    /// bounds how many events a slow subscriber can fall behind before
    /// dropping old ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish a domain event to all subscribers
    pub fn publish(&self, event: DomainEvent) {
        // send() fails only when there are no subscribers, which is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Raw broadcast receiver for ports that take one directly
    /// (e.g. `StorageProvider::start_listeners`)
    pub fn raw_subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Subscribe filtered to a single tenant
    pub fn subscribe_tenant(&self, tenant: impl Into<String>) -> TenantEventReceiver {
        TenantEventReceiver {
            receiver: self.sender.subscribe(),
            tenant: tenant.into(),
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single tenant's events
pub struct TenantEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    tenant: String,
}

impl TenantEventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("event receiver lagged by {} events", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if event.tenant() == self.tenant {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,

    #[error("no events available")]
    Empty,

    #[error("receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
