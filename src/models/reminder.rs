//! # Reminder Schedule Entries
//!
//! Durable snapshot rows for the reminder scheduler's in-memory queue. Entries
//! transition pending → triggered or pending → cancelled; terminal states are
//! never revisited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a scheduled reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderEntryStatus {
    Pending,
    Triggered,
    Cancelled,
}

impl ReminderEntryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReminderEntryStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderEntryStatus::Pending => "pending",
            ReminderEntryStatus::Triggered => "triggered",
            ReminderEntryStatus::Cancelled => "cancelled",
        }
    }
}

/// One scheduled reminder, as held in the queue and snapshotted to durable
/// storage for crash recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderScheduleEntry {
    pub reminder_id: Uuid,
    pub task_id: Uuid,
    pub owner_id: Uuid,
    pub trigger_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub status: ReminderEntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReminderScheduleEntry {
    /// Create a fresh pending entry. Rescheduling a task issues a new entry
    /// (and a new reminder id) rather than mutating a superseded one.
    pub fn pending(
        task_id: Uuid,
        owner_id: Uuid,
        trigger_at: DateTime<Utc>,
        due_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            reminder_id: Uuid::new_v4(),
            task_id,
            owner_id,
            trigger_at,
            due_date,
            status: ReminderEntryStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.trigger_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_pending_entry_is_due_at_trigger_time() {
        let now = Utc::now();
        let entry = ReminderScheduleEntry::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            now + Duration::minutes(5),
            now + Duration::minutes(20),
            now,
        );

        assert_eq!(entry.status, ReminderEntryStatus::Pending);
        assert!(!entry.is_due(now));
        assert!(entry.is_due(now + Duration::minutes(5)));
        assert!(entry.is_due(now + Duration::minutes(6)));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ReminderEntryStatus::Pending.is_terminal());
        assert!(ReminderEntryStatus::Triggered.is_terminal());
        assert!(ReminderEntryStatus::Cancelled.is_terminal());
    }
}
