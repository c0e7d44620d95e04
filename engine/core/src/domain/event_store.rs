// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event-Store Port
//!
//! Append-only per-stream audit log. A stream is keyed by `(streamId,
//! mimetype)`; each stream's `sequence` starts at 0 and is assigned
//! atomically by the backend — no gaps, no duplicates within a stream.
//! Events are immutable once appended.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::errors::AntboxError;

/// One immutable event in a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub stream_id: String,
    pub mimetype: String,
    pub sequence: u64,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Assigns the next sequence in the `(stream_id, mimetype)` stream
    async fn append(
        &self,
        stream_id: &str,
        mimetype: &str,
        payload: Value,
    ) -> Result<StoredEvent, AntboxError>;

    /// Events ordered by sequence ascending
    async fn get_stream(
        &self,
        stream_id: &str,
        mimetype: &str,
    ) -> Result<Vec<StoredEvent>, AntboxError>;

    /// All streams of the given kind, keyed by stream id
    async fn get_streams_by_mimetype(
        &self,
        mimetype: &str,
    ) -> Result<HashMap<String, Vec<StoredEvent>>, AntboxError>;
}
