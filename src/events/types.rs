//! # Lifecycle Event Types
//!
//! The immutable, append-only `TaskEvent` carried on the bus. The payload is a
//! closed tagged union with one variant per event type, so consumers get
//! compile-time-checked field access instead of duck-typed maps. Field names
//! on the wire are fixed; see the variant docs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::constants::topics;
use crate::error::{PipelineError, Result};
use crate::models::task::TaskSnapshot;

/// Reminder kind recorded on `task.reminder-triggered` events. Only due-date
/// reminders exist today.
pub const REMINDER_TYPE_DUE_DATE: &str = "due_date";

/// Old/new pair for one changed field in a `task.updated` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// Type-specific payload. Serializes flattened into the event envelope with an
/// `event_type` tag, producing exactly the wire shapes consumers expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum TaskEventPayload {
    /// `{event_type, event_id, timestamp, actor_id, task: {...}}`
    #[serde(rename = "task.created")]
    Created { actor_id: Uuid, task: TaskSnapshot },

    /// `{event_type, event_id, timestamp, actor_id, task_id, changes, task}`.
    /// `task` carries the post-update snapshot so consumers can act on current
    /// state without replaying the change history.
    #[serde(rename = "task.updated")]
    Updated {
        actor_id: Uuid,
        task_id: Uuid,
        changes: BTreeMap<String, FieldChange>,
        task: TaskSnapshot,
    },

    /// `{event_type, event_id, timestamp, actor_id, task_id, completed_at}`
    #[serde(rename = "task.completed")]
    Completed {
        actor_id: Uuid,
        task_id: Uuid,
        completed_at: DateTime<Utc>,
    },

    /// `{event_type, event_id, timestamp, actor_id, task_id}`
    #[serde(rename = "task.deleted")]
    Deleted { actor_id: Uuid, task_id: Uuid },

    /// `{event_type, event_id, timestamp, task_id, user_id, reminder_type, due_date}`
    #[serde(rename = "task.reminder-triggered")]
    ReminderTriggered {
        task_id: Uuid,
        user_id: Uuid,
        reminder_type: String,
        due_date: DateTime<Utc>,
    },
}

/// An immutable lifecycle event. `event_id` is the idempotency key; consumers
/// deduplicate on it to tolerate at-least-once redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(flatten)]
    pub payload: TaskEventPayload,
}

impl TaskEvent {
    /// Create a fresh event with a new id, stamped now.
    pub fn new(payload: TaskEventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            payload,
        }
    }

    /// Attach a correlation id for tracing related events.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Topic this event belongs on.
    pub fn topic(&self) -> &'static str {
        match &self.payload {
            TaskEventPayload::Created { .. } => topics::TASK_CREATED,
            TaskEventPayload::Updated { .. } => topics::TASK_UPDATED,
            TaskEventPayload::Completed { .. } => topics::TASK_COMPLETED,
            TaskEventPayload::Deleted { .. } => topics::TASK_DELETED,
            TaskEventPayload::ReminderTriggered { .. } => topics::TASK_REMINDER_TRIGGERED,
        }
    }

    /// The subject task's id, uniform across variants. Also the partition key
    /// for ordered delivery.
    pub fn task_id(&self) -> Uuid {
        match &self.payload {
            TaskEventPayload::Created { task, .. } => task.id,
            TaskEventPayload::Updated { task_id, .. }
            | TaskEventPayload::Completed { task_id, .. }
            | TaskEventPayload::Deleted { task_id, .. }
            | TaskEventPayload::ReminderTriggered { task_id, .. } => *task_id,
        }
    }

    /// The user this event concerns: the task owner where known, otherwise the
    /// acting user.
    pub fn interested_user(&self) -> Uuid {
        match &self.payload {
            TaskEventPayload::Created { task, .. } => task.owner_id,
            TaskEventPayload::Updated { task, .. } => task.owner_id,
            TaskEventPayload::Completed { actor_id, .. }
            | TaskEventPayload::Deleted { actor_id, .. } => *actor_id,
            TaskEventPayload::ReminderTriggered { user_id, .. } => *user_id,
        }
    }

    /// Partition key for the time-partitioned audit log: `date(timestamp)`.
    pub fn partition_key(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Serialize for queue storage.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from queue storage, rejecting malformed payloads.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        serde_json::from_value(json)
            .map_err(|e| PipelineError::validation(format!("malformed event payload: {e}")))
    }
}

/// Build the `changes` map for a `task.updated` payload by diffing two task
/// snapshots of the same row.
pub fn diff_tasks(before: &crate::models::Task, after: &crate::models::Task) -> BTreeMap<String, FieldChange> {
    let mut changes = BTreeMap::new();
    let mut record = |field: &str, old: serde_json::Value, new: serde_json::Value| {
        if old != new {
            changes.insert(field.to_string(), FieldChange { old, new });
        }
    };

    record("title", json(&before.title), json(&after.title));
    record(
        "description",
        json(&before.description),
        json(&after.description),
    );
    record("status", json(&before.status), json(&after.status));
    record("due_date", json(&before.due_date), json(&after.due_date));
    record(
        "recurrence_pattern",
        json(&before.recurrence_pattern),
        json(&after.recurrence_pattern),
    );
    record(
        "recurrence_end_date",
        json(&before.recurrence_end_date),
        json(&after.recurrence_end_date),
    );
    record(
        "reminder_offset",
        json(&before.reminder_offset_seconds),
        json(&after.reminder_offset_seconds),
    );
    changes
}

fn json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
