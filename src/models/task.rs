//! # Task Model
//!
//! The task shape this subsystem observes. The relational store owning plain
//! CRUD lives outside this crate; these types define the fields and invariants
//! the pipeline depends on, the creation/patch companions the producer accepts,
//! and the snapshot embedded in `task.created`/`task.updated` events.
//!
//! ## Invariants
//!
//! - recurrence pattern present ⇒ due date present
//! - recurrence end date present ⇒ recurrence pattern present
//! - parent task id present ⇔ occurrence date present
//! - reminder offset present ⇒ due date present
//! - at most one row per (parent task id, occurrence date) pair (enforced by
//!   the store's uniqueness constraint)

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::recurrence::RecurrencePattern;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Open,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal tasks are excluded from recurring generation and reminders.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

/// Reminder delivery status tracked on the task row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    None,
    Pending,
    Sent,
    Acknowledged,
    Cancelled,
}

/// A task instance as observed by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    /// Opaque recurrence pattern string, validated at creation time
    pub recurrence_pattern: Option<String>,
    pub recurrence_end_date: Option<DateTime<Utc>>,
    /// Present on materialized instances of a recurring task
    pub parent_task_id: Option<Uuid>,
    pub occurrence_date: Option<NaiveDate>,
    /// Seconds before the due date at which the reminder fires
    pub reminder_offset_seconds: Option<i64>,
    pub reminder_status: ReminderStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The instant the task's reminder should fire, when one is configured.
    pub fn reminder_trigger_at(&self) -> Option<DateTime<Utc>> {
        let due = self.due_date?;
        let offset = self.reminder_offset_seconds?;
        Some(due - Duration::seconds(offset))
    }

    /// Parsed recurrence pattern, when one is set.
    pub fn recurrence(&self) -> Result<Option<RecurrencePattern>> {
        self.recurrence_pattern
            .as_deref()
            .map(RecurrencePattern::parse)
            .transpose()
    }

    /// Snapshot embedded in lifecycle event payloads.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title.clone(),
            description: self.description.clone(),
            due_date: self.due_date,
            recurrence_pattern: self.recurrence_pattern.clone(),
            reminder_offset: self.reminder_offset_seconds,
        }
    }
}

/// Task fields carried inside `task.created` and `task.updated` payloads.
/// `reminder_offset` is in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_offset: Option<i64>,
}

impl TaskSnapshot {
    /// The instant the reminder should fire, when one is configured.
    pub fn reminder_trigger_at(&self) -> Option<DateTime<Utc>> {
        let due = self.due_date?;
        let offset = self.reminder_offset?;
        Some(due - Duration::seconds(offset))
    }
}

/// Fields accepted when creating a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub owner_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence_pattern: Option<String>,
    #[serde(default)]
    pub recurrence_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_task_id: Option<Uuid>,
    #[serde(default)]
    pub occurrence_date: Option<NaiveDate>,
    #[serde(default)]
    pub reminder_offset_seconds: Option<i64>,
}

impl NewTask {
    /// Minimal constructor for the common case.
    pub fn new(owner_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            owner_id,
            title: title.into(),
            description: None,
            due_date: None,
            recurrence_pattern: None,
            recurrence_end_date: None,
            parent_task_id: None,
            occurrence_date: None,
            reminder_offset_seconds: None,
        }
    }

    /// Validate the model invariants and the recurrence pattern syntax.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(PipelineError::validation("title must not be empty"));
        }
        if self.recurrence_pattern.is_some() && self.due_date.is_none() {
            return Err(PipelineError::validation(
                "a recurrence pattern requires a due date",
            ));
        }
        if self.recurrence_end_date.is_some() && self.recurrence_pattern.is_none() {
            return Err(PipelineError::validation(
                "a recurrence end date requires a recurrence pattern",
            ));
        }
        if self.parent_task_id.is_some() != self.occurrence_date.is_some() {
            return Err(PipelineError::validation(
                "parent task id and occurrence date must be set together",
            ));
        }
        if self.reminder_offset_seconds.is_some() && self.due_date.is_none() {
            return Err(PipelineError::validation(
                "a reminder offset requires a due date",
            ));
        }
        if let Some(offset) = self.reminder_offset_seconds {
            if offset < 0 {
                return Err(PipelineError::validation(
                    "reminder offset must not be negative",
                ));
            }
        }
        if let Some(pattern) = &self.recurrence_pattern {
            RecurrencePattern::parse(pattern)?;
        }
        Ok(())
    }

    /// Materialize the full row; the store calls this after validation.
    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        Task {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            title: self.title,
            description: self.description,
            status: TaskStatus::Open,
            due_date: self.due_date,
            recurrence_pattern: self.recurrence_pattern,
            recurrence_end_date: self.recurrence_end_date,
            parent_task_id: self.parent_task_id,
            occurrence_date: self.occurrence_date,
            reminder_status: if self.reminder_offset_seconds.is_some() {
                ReminderStatus::Pending
            } else {
                ReminderStatus::None
            },
            reminder_offset_seconds: self.reminder_offset_seconds,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied through the producer. `clear_*` flags distinguish
/// "leave unchanged" from "remove the value".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clear_due_date: bool,
    #[serde(default)]
    pub recurrence_pattern: Option<String>,
    #[serde(default)]
    pub recurrence_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_offset_seconds: Option<i64>,
    #[serde(default)]
    pub clear_reminder_offset: bool,
}

impl TaskPatch {
    /// Apply to an existing row, returning the updated row. Invariants are
    /// re-checked on the result.
    pub fn apply(&self, task: &Task, now: DateTime<Utc>) -> Result<Task> {
        let mut updated = task.clone();
        if let Some(title) = &self.title {
            updated.title = title.clone();
        }
        if let Some(description) = &self.description {
            updated.description = Some(description.clone());
        }
        if self.clear_due_date {
            updated.due_date = None;
        } else if let Some(due) = self.due_date {
            updated.due_date = Some(due);
        }
        if let Some(pattern) = &self.recurrence_pattern {
            updated.recurrence_pattern = Some(pattern.clone());
        }
        if let Some(end) = self.recurrence_end_date {
            updated.recurrence_end_date = Some(end);
        }
        if self.clear_reminder_offset {
            updated.reminder_offset_seconds = None;
            updated.reminder_status = ReminderStatus::Cancelled;
        } else if let Some(offset) = self.reminder_offset_seconds {
            updated.reminder_offset_seconds = Some(offset);
            updated.reminder_status = ReminderStatus::Pending;
        }
        updated.updated_at = now;

        let check = NewTask {
            owner_id: updated.owner_id,
            title: updated.title.clone(),
            description: updated.description.clone(),
            due_date: updated.due_date,
            recurrence_pattern: updated.recurrence_pattern.clone(),
            recurrence_end_date: updated.recurrence_end_date,
            parent_task_id: updated.parent_task_id,
            occurrence_date: updated.occurrence_date,
            reminder_offset_seconds: updated.reminder_offset_seconds,
        };
        check.validate()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 22, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_recurrence_requires_due_date() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "standup notes");
        new_task.recurrence_pattern = Some("daily".to_string());
        assert!(new_task.validate().is_err());

        new_task.due_date = Some(due());
        assert!(new_task.validate().is_ok());
    }

    #[test]
    fn test_end_date_requires_pattern() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "standup notes");
        new_task.due_date = Some(due());
        new_task.recurrence_end_date = Some(due());
        assert!(new_task.validate().is_err());
    }

    #[test]
    fn test_parent_and_occurrence_set_together() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "instance");
        new_task.parent_task_id = Some(Uuid::new_v4());
        assert!(new_task.validate().is_err());

        new_task.occurrence_date = NaiveDate::from_ymd_opt(2026, 1, 22);
        assert!(new_task.validate().is_ok());
    }

    #[test]
    fn test_reminder_offset_requires_due_date() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "call dentist");
        new_task.reminder_offset_seconds = Some(900);
        assert!(new_task.validate().is_err());

        new_task.due_date = Some(due());
        assert!(new_task.validate().is_ok());

        new_task.reminder_offset_seconds = Some(-10);
        assert!(new_task.validate().is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "bad pattern");
        new_task.due_date = Some(due());
        new_task.recurrence_pattern = Some("hourly".to_string());
        assert!(new_task.validate().is_err());
    }

    #[test]
    fn test_trigger_at_is_due_minus_offset() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "call dentist");
        new_task.due_date = Some(due());
        new_task.reminder_offset_seconds = Some(900);
        let task = new_task.into_task(Utc::now());

        assert_eq!(
            task.reminder_trigger_at().unwrap(),
            due() - Duration::seconds(900)
        );
        assert_eq!(task.reminder_status, ReminderStatus::Pending);
    }

    #[test]
    fn test_patch_clear_due_date_rejected_under_recurrence() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "standup notes");
        new_task.due_date = Some(due());
        new_task.recurrence_pattern = Some("daily".to_string());
        let task = new_task.into_task(Utc::now());

        let patch = TaskPatch {
            clear_due_date: true,
            ..Default::default()
        };
        assert!(patch.apply(&task, Utc::now()).is_err());
    }

    #[test]
    fn test_patch_reschedules_reminder() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "call dentist");
        new_task.due_date = Some(due());
        new_task.reminder_offset_seconds = Some(900);
        let task = new_task.into_task(Utc::now());

        let new_due = due() + Duration::hours(2);
        let patch = TaskPatch {
            due_date: Some(new_due),
            ..Default::default()
        };
        let updated = patch.apply(&task, Utc::now()).unwrap();
        assert_eq!(
            updated.reminder_trigger_at().unwrap(),
            new_due - Duration::seconds(900)
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut new_task = NewTask::new(Uuid::new_v4(), "call dentist");
        new_task.due_date = Some(due());
        new_task.reminder_offset_seconds = Some(900);
        let task = new_task.into_task(Utc::now());

        let snapshot = task.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: TaskSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
        assert_eq!(parsed.reminder_trigger_at(), task.reminder_trigger_at());
    }
}
