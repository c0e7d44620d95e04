// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL Event Store
//!
//! Append-only audit streams. Sequence assignment is serialized per
//! `(stream_id, mimetype)` by the primary key: the insert computes
//! `MAX(sequence)+1` and retries on the unique violation a concurrent
//! appender can cause, so streams never have gaps or duplicates.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;

use crate::domain::errors::AntboxError;
use crate::domain::event_store::{EventStore, StoredEvent};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS event_streams (
    stream_id   TEXT NOT NULL,
    mimetype    TEXT NOT NULL,
    sequence    BIGINT NOT NULL,
    payload     JSONB NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (stream_id, mimetype, sequence)
);
"#;

const MAX_APPEND_RETRIES: usize = 8;

pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), AntboxError> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, AntboxError> {
        Ok(StoredEvent {
            stream_id: row
                .try_get("stream_id")
                .map_err(|e| AntboxError::Unknown(e.to_string()))?,
            mimetype: row
                .try_get("mimetype")
                .map_err(|e| AntboxError::Unknown(e.to_string()))?,
            sequence: row
                .try_get::<i64, _>("sequence")
                .map_err(|e| AntboxError::Unknown(e.to_string()))? as u64,
            payload: row
                .try_get("payload")
                .map_err(|e| AntboxError::Unknown(e.to_string()))?,
            recorded_at: row
                .try_get("recorded_at")
                .map_err(|e| AntboxError::Unknown(e.to_string()))?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(
        &self,
        stream_id: &str,
        mimetype: &str,
        payload: serde_json::Value,
    ) -> Result<StoredEvent, AntboxError> {
        for _ in 0..MAX_APPEND_RETRIES {
            let result = sqlx::query(
                r#"
                INSERT INTO event_streams (stream_id, mimetype, sequence, payload)
                SELECT $1, $2, COALESCE(MAX(sequence) + 1, 0), $3
                FROM event_streams
                WHERE stream_id = $1 AND mimetype = $2
                RETURNING stream_id, mimetype, sequence, payload, recorded_at
                "#,
            )
            .bind(stream_id)
            .bind(mimetype)
            .bind(&payload)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => return Self::event_from_row(&row),
                // Concurrent appender took the sequence; recompute and retry
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AntboxError::Unknown(format!(
            "sequence contention on stream {stream_id}/{mimetype}"
        )))
    }

    async fn get_stream(
        &self,
        stream_id: &str,
        mimetype: &str,
    ) -> Result<Vec<StoredEvent>, AntboxError> {
        let rows = sqlx::query(
            r#"
            SELECT stream_id, mimetype, sequence, payload, recorded_at
            FROM event_streams
            WHERE stream_id = $1 AND mimetype = $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(stream_id)
        .bind(mimetype)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::event_from_row).collect()
    }

    async fn get_streams_by_mimetype(
        &self,
        mimetype: &str,
    ) -> Result<HashMap<String, Vec<StoredEvent>>, AntboxError> {
        let rows = sqlx::query(
            r#"
            SELECT stream_id, mimetype, sequence, payload, recorded_at
            FROM event_streams
            WHERE mimetype = $1
            ORDER BY stream_id ASC, sequence ASC
            "#,
        )
        .bind(mimetype)
        .fetch_all(&self.pool)
        .await?;

        let mut streams: HashMap<String, Vec<StoredEvent>> = HashMap::new();
        for row in &rows {
            let event = Self::event_from_row(row)?;
            streams.entry(event.stream_id.clone()).or_default().push(event);
        }
        Ok(streams)
    }
}
