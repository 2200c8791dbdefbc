//! # Audit Log Store
//!
//! Append-only, time-partitioned persistence for lifecycle events. Rows key on
//! `partition_key = date(timestamp)`; the event id is the primary key, so a
//! redelivered event appends exactly once regardless of which flush carries
//! it. No update or delete surface exists; the log is write-once, read-many.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::error::Result;
use crate::events::TaskEvent;

/// One persisted audit row
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    pub event_id: Uuid,
    pub event_type: String,
    pub task_id: Uuid,
    pub partition_key: NaiveDate,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl AuditEntry {
    /// Build the audit row for an event. Serialization failures cannot occur
    /// for the closed payload union, but the signature stays fallible to keep
    /// the decode boundary honest.
    pub fn from_event(event: &TaskEvent) -> Result<Self> {
        Ok(Self {
            event_id: event.event_id,
            event_type: event.topic().to_string(),
            task_id: event.task_id(),
            partition_key: event.partition_key(),
            timestamp: event.timestamp,
            payload: event.to_json()?,
        })
    }
}

/// Append-only audit persistence surface
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a batch. Entries whose event id already exists are skipped;
    /// returns the number actually written.
    async fn append(&self, entries: &[AuditEntry]) -> Result<usize>;

    /// Full chronological event history for one task, ascending by timestamp.
    async fn history_for_task(&self, task_id: Uuid) -> Result<Vec<AuditEntry>>;
}

/// In-memory audit store partitioned by date
#[derive(Default)]
pub struct InMemoryAuditStore {
    partitions: Mutex<BTreeMap<NaiveDate, Vec<AuditEntry>>>,
    seen: Mutex<HashSet<Uuid>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition keys currently holding rows, for assertions.
    pub fn partition_keys(&self) -> Vec<NaiveDate> {
        self.partitions.lock().keys().copied().collect()
    }

    pub fn total_entries(&self) -> usize {
        self.partitions.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entries: &[AuditEntry]) -> Result<usize> {
        let mut seen = self.seen.lock();
        let mut partitions = self.partitions.lock();
        let mut written = 0;
        for entry in entries {
            if !seen.insert(entry.event_id) {
                continue;
            }
            partitions
                .entry(entry.partition_key)
                .or_default()
                .push(entry.clone());
            written += 1;
        }
        Ok(written)
    }

    async fn history_for_task(&self, task_id: Uuid) -> Result<Vec<AuditEntry>> {
        let partitions = self.partitions.lock();
        let mut history: Vec<AuditEntry> = partitions
            .values()
            .flatten()
            .filter(|entry| entry.task_id == task_id)
            .cloned()
            .collect();
        history.sort_by_key(|entry| entry.timestamp);
        Ok(history)
    }
}

/// Schema for the Postgres-backed audit store.
pub const AUDIT_LOG_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    event_id      UUID PRIMARY KEY,
    event_type    TEXT NOT NULL,
    task_id       UUID NOT NULL,
    partition_key DATE NOT NULL,
    timestamp     TIMESTAMPTZ NOT NULL,
    payload       JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_log_task ON audit_log (task_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_log_partition ON audit_log (partition_key);
"#;

#[derive(FromRow)]
struct AuditRow {
    event_id: Uuid,
    event_type: String,
    task_id: Uuid,
    partition_key: NaiveDate,
    timestamp: DateTime<Utc>,
    payload: serde_json::Value,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            event_id: row.event_id,
            event_type: row.event_type,
            task_id: row.task_id,
            partition_key: row.partition_key,
            timestamp: row.timestamp,
            payload: row.payload,
        }
    }
}

/// Postgres-backed audit store
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(AUDIT_LOG_DDL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, entries: &[AuditEntry]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;
        for entry in entries {
            let result = sqlx::query(
                "INSERT INTO audit_log
                     (event_id, event_type, task_id, partition_key, timestamp, payload)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (event_id) DO NOTHING",
            )
            .bind(entry.event_id)
            .bind(&entry.event_type)
            .bind(entry.task_id)
            .bind(entry.partition_key)
            .bind(entry.timestamp)
            .bind(&entry.payload)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn history_for_task(&self, task_id: Uuid) -> Result<Vec<AuditEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT event_id, event_type, task_id, partition_key, timestamp, payload
             FROM audit_log
             WHERE task_id = $1
             ORDER BY timestamp",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }
}
