//! # Reminder Snapshot Store
//!
//! Durable persistence for the reminder queue. The in-memory heap stays
//! authoritative between snapshots; these stores exist so a restart can
//! rebuild the queue and catch up on anything that came due while the process
//! was down.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::reminder::{ReminderEntryStatus, ReminderScheduleEntry};

/// Durable reminder snapshot surface
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist the full pending set: upsert every entry, and cancel any row
    /// still marked pending that no longer appears in the set.
    async fn replace_pending(&self, entries: &[ReminderScheduleEntry]) -> Result<()>;

    /// Record a terminal transition for one reminder. A no-op for rows not in
    /// the pending state (terminal states are never revisited).
    async fn mark(
        &self,
        reminder_id: Uuid,
        status: ReminderEntryStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Load every pending entry for queue rebuild on startup.
    async fn load_pending(&self) -> Result<Vec<ReminderScheduleEntry>>;
}

/// In-memory snapshot store for tests and single-process deployments
#[derive(Default)]
pub struct InMemorySnapshotStore {
    rows: Mutex<HashMap<Uuid, ReminderScheduleEntry>>,
    injected_failures: AtomicU32,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes. Test hook for the snapshot-failure path.
    pub fn inject_failures(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Every row regardless of status, for assertions.
    pub fn all_rows(&self) -> Vec<ReminderScheduleEntry> {
        self.rows.lock().values().cloned().collect()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn replace_pending(&self, entries: &[ReminderScheduleEntry]) -> Result<()> {
        if self.take_injected_failure() {
            return Err(PipelineError::snapshot_persist("injected write failure"));
        }
        let mut rows = self.rows.lock();
        let live: std::collections::HashSet<Uuid> =
            entries.iter().map(|e| e.reminder_id).collect();
        for row in rows.values_mut() {
            if row.status == ReminderEntryStatus::Pending && !live.contains(&row.reminder_id) {
                row.status = ReminderEntryStatus::Cancelled;
                row.updated_at = Utc::now();
            }
        }
        for entry in entries {
            rows.insert(entry.reminder_id, entry.clone());
        }
        Ok(())
    }

    async fn mark(
        &self,
        reminder_id: Uuid,
        status: ReminderEntryStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if self.take_injected_failure() {
            return Err(PipelineError::snapshot_persist("injected write failure"));
        }
        let mut rows = self.rows.lock();
        if let Some(row) = rows.get_mut(&reminder_id) {
            if row.status == ReminderEntryStatus::Pending {
                row.status = status;
                row.updated_at = at;
            }
        }
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<ReminderScheduleEntry>> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|row| row.status == ReminderEntryStatus::Pending)
            .cloned()
            .collect())
    }
}

/// Schema for the Postgres-backed snapshot store.
pub const REMINDER_SNAPSHOT_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS reminder_snapshots (
    reminder_id UUID PRIMARY KEY,
    task_id     UUID NOT NULL,
    owner_id    UUID NOT NULL,
    trigger_at  TIMESTAMPTZ NOT NULL,
    due_date    TIMESTAMPTZ NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reminder_snapshots_status
    ON reminder_snapshots (status, trigger_at);
"#;

#[derive(FromRow)]
struct SnapshotRow {
    reminder_id: Uuid,
    task_id: Uuid,
    owner_id: Uuid,
    trigger_at: DateTime<Utc>,
    due_date: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_entry(self) -> Result<ReminderScheduleEntry> {
        let status = match self.status.as_str() {
            "pending" => ReminderEntryStatus::Pending,
            "triggered" => ReminderEntryStatus::Triggered,
            "cancelled" => ReminderEntryStatus::Cancelled,
            other => {
                return Err(PipelineError::snapshot_persist(format!(
                    "unknown reminder status in snapshot row: {other}"
                )))
            }
        };
        Ok(ReminderScheduleEntry {
            reminder_id: self.reminder_id,
            task_id: self.task_id,
            owner_id: self.owner_id,
            trigger_at: self.trigger_at,
            due_date: self.due_date,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Postgres-backed snapshot store
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the snapshot table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(REMINDER_SNAPSHOT_DDL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn replace_pending(&self, entries: &[ReminderScheduleEntry]) -> Result<()> {
        let live_ids: Vec<Uuid> = entries.iter().map(|e| e.reminder_id).collect();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE reminder_snapshots
             SET status = 'cancelled', updated_at = NOW()
             WHERE status = 'pending' AND NOT (reminder_id = ANY($1))",
        )
        .bind(&live_ids)
        .execute(&mut *tx)
        .await?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO reminder_snapshots
                     (reminder_id, task_id, owner_id, trigger_at, due_date, status,
                      created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (reminder_id) DO UPDATE
                 SET trigger_at = EXCLUDED.trigger_at,
                     due_date = EXCLUDED.due_date,
                     status = EXCLUDED.status,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(entry.reminder_id)
            .bind(entry.task_id)
            .bind(entry.owner_id)
            .bind(entry.trigger_at)
            .bind(entry.due_date)
            .bind(entry.status.as_str())
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark(
        &self,
        reminder_id: Uuid,
        status: ReminderEntryStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE reminder_snapshots
             SET status = $2, updated_at = $3
             WHERE reminder_id = $1 AND status = 'pending'",
        )
        .bind(reminder_id)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<ReminderScheduleEntry>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            "SELECT reminder_id, task_id, owner_id, trigger_at, due_date, status,
                    created_at, updated_at
             FROM reminder_snapshots
             WHERE status = 'pending'
             ORDER BY trigger_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SnapshotRow::into_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(trigger_at: DateTime<Utc>) -> ReminderScheduleEntry {
        ReminderScheduleEntry::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            trigger_at,
            trigger_at + Duration::minutes(15),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_replace_pending_round_trips() {
        let store = InMemorySnapshotStore::new();
        let now = Utc::now();
        let first = entry(now + Duration::minutes(5));
        let second = entry(now + Duration::minutes(10));

        store
            .replace_pending(&[first.clone(), second.clone()])
            .await
            .unwrap();
        let mut loaded = store.load_pending().await.unwrap();
        loaded.sort_by_key(|e| e.trigger_at);
        assert_eq!(loaded, vec![first, second]);
    }

    #[tokio::test]
    async fn test_replace_pending_cancels_departed_rows() {
        let store = InMemorySnapshotStore::new();
        let now = Utc::now();
        let kept = entry(now + Duration::minutes(5));
        let dropped = entry(now + Duration::minutes(10));

        store
            .replace_pending(&[kept.clone(), dropped.clone()])
            .await
            .unwrap();
        store.replace_pending(&[kept.clone()]).await.unwrap();

        let loaded = store.load_pending().await.unwrap();
        assert_eq!(loaded, vec![kept]);
        let cancelled = store
            .all_rows()
            .into_iter()
            .find(|r| r.reminder_id == dropped.reminder_id)
            .unwrap();
        assert_eq!(cancelled.status, ReminderEntryStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_mark_only_touches_pending_rows() {
        let store = InMemorySnapshotStore::new();
        let now = Utc::now();
        let reminder = entry(now + Duration::minutes(5));
        store.replace_pending(&[reminder.clone()]).await.unwrap();

        store
            .mark(reminder.reminder_id, ReminderEntryStatus::Triggered, now)
            .await
            .unwrap();
        // A second transition attempt must not revive or rewrite the row.
        store
            .mark(reminder.reminder_id, ReminderEntryStatus::Cancelled, now)
            .await
            .unwrap();

        let row = store
            .all_rows()
            .into_iter()
            .find(|r| r.reminder_id == reminder.reminder_id)
            .unwrap();
        assert_eq!(row.status, ReminderEntryStatus::Triggered);
    }

    #[tokio::test]
    async fn test_injected_failure_surfaces_as_snapshot_error() {
        let store = InMemorySnapshotStore::new();
        store.inject_failures(1);
        let result = store.replace_pending(&[]).await;
        assert!(matches!(
            result,
            Err(PipelineError::SnapshotPersist { .. })
        ));
        // The next write succeeds.
        assert!(store.replace_pending(&[]).await.is_ok());
    }
}
