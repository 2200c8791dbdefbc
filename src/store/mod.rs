//! # Task Store Seam
//!
//! The relational store owning plain task CRUD is an external collaborator;
//! this module defines the narrow interface the pipeline consumes and an
//! in-memory reference implementation used by tests, the demo server, and the
//! recurring task processor's uniqueness checks.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewTask, Task, TaskPatch, TaskStatus};

/// Store-level failures surfaced to the producer and processor
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("task not found: {task_id}")]
    NotFound { task_id: Uuid },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl From<crate::error::PipelineError> for StoreError {
    fn from(err: crate::error::PipelineError) -> Self {
        StoreError::Validation {
            message: err.to_string(),
        }
    }
}

/// Result of an update: the row before and after the patch, for building the
/// `changes` map on `task.updated` events.
#[derive(Debug, Clone)]
pub struct UpdatedTask {
    pub before: Task,
    pub after: Task,
}

/// Mutation and query surface the pipeline consumes
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, new_task: NewTask) -> Result<Task, StoreError>;

    async fn update(&self, task_id: Uuid, patch: TaskPatch) -> Result<UpdatedTask, StoreError>;

    async fn complete(&self, task_id: Uuid, completed_at: DateTime<Utc>)
        -> Result<Task, StoreError>;

    async fn delete(&self, task_id: Uuid) -> Result<Task, StoreError>;

    async fn get(&self, task_id: Uuid) -> Result<Task, StoreError>;

    /// Recurring parents still eligible for generation: non-terminal, with a
    /// recurrence pattern, and an end date either null or after `now`.
    async fn active_recurring(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError>;

    /// Whether an instance row exists for `(parent, occurrence_date)`.
    async fn instance_exists(
        &self,
        parent_task_id: Uuid,
        occurrence_date: NaiveDate,
    ) -> Result<bool, StoreError>;
}

/// In-memory task store enforcing the model invariants and the
/// `(parent, occurrence_date)` uniqueness constraint.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<Uuid, Task>,
    // Uniqueness index guarded separately so create can check-and-reserve
    // atomically with respect to concurrent generation attempts.
    instance_index: Mutex<HashSet<(Uuid, NaiveDate)>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, new_task: NewTask) -> Result<Task, StoreError> {
        new_task.validate().map_err(|e| StoreError::Validation {
            message: e.to_string(),
        })?;

        if let (Some(parent), Some(occurrence)) =
            (new_task.parent_task_id, new_task.occurrence_date)
        {
            let mut index = self.instance_index.lock();
            if !index.insert((parent, occurrence)) {
                return Err(StoreError::Conflict {
                    message: format!(
                        "instance of {parent} for {occurrence} already exists"
                    ),
                });
            }
        }

        let task = new_task.into_task(Utc::now());
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn update(&self, task_id: Uuid, patch: TaskPatch) -> Result<UpdatedTask, StoreError> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::NotFound { task_id })?;
        let before = entry.clone();
        let after = patch
            .apply(&before, Utc::now())
            .map_err(|e| StoreError::Validation {
                message: e.to_string(),
            })?;
        *entry = after.clone();
        Ok(UpdatedTask { before, after })
    }

    async fn complete(
        &self,
        task_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let mut entry = self
            .tasks
            .get_mut(&task_id)
            .ok_or(StoreError::NotFound { task_id })?;
        entry.status = TaskStatus::Completed;
        entry.completed_at = Some(completed_at);
        entry.updated_at = completed_at;
        Ok(entry.clone())
    }

    async fn delete(&self, task_id: Uuid) -> Result<Task, StoreError> {
        let (_, task) = self
            .tasks
            .remove(&task_id)
            .ok_or(StoreError::NotFound { task_id })?;
        if let (Some(parent), Some(occurrence)) = (task.parent_task_id, task.occurrence_date) {
            self.instance_index.lock().remove(&(parent, occurrence));
        }
        Ok(task)
    }

    async fn get(&self, task_id: Uuid) -> Result<Task, StoreError> {
        self.tasks
            .get(&task_id)
            .map(|t| t.value().clone())
            .ok_or(StoreError::NotFound { task_id })
    }

    async fn active_recurring(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| {
                t.recurrence_pattern.is_some()
                    && !t.status.is_terminal()
                    && t.recurrence_end_date.map_or(true, |end| end > now)
            })
            .map(|t| t.value().clone())
            .collect())
    }

    async fn instance_exists(
        &self,
        parent_task_id: Uuid,
        occurrence_date: NaiveDate,
    ) -> Result<bool, StoreError> {
        Ok(self
            .instance_index
            .lock()
            .contains(&(parent_task_id, occurrence_date)))
    }
}
