//! # Task Lifecycle Producer
//!
//! The single authorized emitter of `task.created`, `task.updated`,
//! `task.completed`, and `task.deleted`. Wraps the task store's mutation
//! operations: after each successful store mutation the corresponding event is
//! handed to a dedicated publisher worker and the mutation result returns to
//! the caller immediately. The worker publishes sequentially, preserving
//! per-task publish order, and absorbs broker failures; a mutation is never
//! rolled back or failed because its event could not be published.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{diff_tasks, EventBus, PublishError, TaskEvent, TaskEventPayload};
use crate::metrics::PipelineMetrics;
use crate::models::{NewTask, Task, TaskPatch};
use crate::store::{StoreError, TaskStore};

/// Depth of the producer's outbound queue. Mutations never wait on this; a
/// full queue degrades to dropped events, logged and counted.
const OUTBOUND_QUEUE_DEPTH: usize = 1024;

/// Producer wrapping the task store's mutations
pub struct TaskLifecycleProducer {
    store: Arc<dyn TaskStore>,
    outbound: mpsc::Sender<TaskEvent>,
}

impl TaskLifecycleProducer {
    /// Create the producer and spawn its publisher worker.
    pub fn new(
        store: Arc<dyn TaskStore>,
        bus: Arc<dyn EventBus>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        tokio::spawn(publisher_worker(rx, bus, metrics));
        Self {
            store,
            outbound: tx,
        }
    }

    /// Create a task and emit `task.created`.
    pub async fn create(&self, actor_id: Uuid, new_task: NewTask) -> Result<Task, StoreError> {
        let task = self.store.create(new_task).await?;
        self.emit(TaskEvent::new(TaskEventPayload::Created {
            actor_id,
            task: task.snapshot(),
        }));
        Ok(task)
    }

    /// Apply a patch and emit `task.updated` with a per-field changes map.
    pub async fn update(
        &self,
        actor_id: Uuid,
        task_id: Uuid,
        patch: TaskPatch,
    ) -> Result<Task, StoreError> {
        let updated = self.store.update(task_id, patch).await?;
        let changes = diff_tasks(&updated.before, &updated.after);
        self.emit(TaskEvent::new(TaskEventPayload::Updated {
            actor_id,
            task_id,
            changes,
            task: updated.after.snapshot(),
        }));
        Ok(updated.after)
    }

    /// Mark a task completed and emit `task.completed`.
    pub async fn complete(&self, actor_id: Uuid, task_id: Uuid) -> Result<Task, StoreError> {
        let completed_at = Utc::now();
        let task = self.store.complete(task_id, completed_at).await?;
        self.emit(TaskEvent::new(TaskEventPayload::Completed {
            actor_id,
            task_id,
            completed_at,
        }));
        Ok(task)
    }

    /// Delete a task and emit `task.deleted`.
    pub async fn delete(&self, actor_id: Uuid, task_id: Uuid) -> Result<Task, StoreError> {
        let task = self.store.delete(task_id).await?;
        self.emit(TaskEvent::new(TaskEventPayload::Deleted {
            actor_id,
            task_id,
        }));
        Ok(task)
    }

    /// Read access for callers that hold the producer but not the store.
    pub async fn get(&self, task_id: Uuid) -> Result<Task, StoreError> {
        self.store.get(task_id).await
    }

    /// Hand an event to the publisher worker without waiting. The queue is
    /// deep enough that a full queue implies a stalled broker; the event is
    /// then dropped in favor of keeping mutations responsive.
    fn emit(&self, event: TaskEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.outbound.try_send(event) {
            warn!(
                event_id = %event.event_id,
                topic = event.topic(),
                "publisher queue full; event dropped"
            );
        }
    }
}

async fn publisher_worker(
    mut rx: mpsc::Receiver<TaskEvent>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<PipelineMetrics>,
) {
    while let Some(event) = rx.recv().await {
        let topic = event.topic();
        match bus.publish(topic, &event).await {
            Ok(_) => {
                metrics.set_broker_available(true);
                debug!(topic, event_id = %event.event_id, "lifecycle event published");
            }
            Err(PublishError::DeadLettered { attempts, .. }) => {
                metrics.record_publish_failure();
                warn!(
                    topic,
                    event_id = %event.event_id,
                    attempts,
                    "lifecycle event dead-lettered"
                );
            }
            Err(err) => {
                metrics.record_publish_failure();
                metrics.set_broker_available(false);
                warn!(topic, event_id = %event.event_id, error = %err, "publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::constants::topics;
    use crate::events::InMemoryEventBus;
    use crate::store::InMemoryTaskStore;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;

    struct Fixture {
        bus: InMemoryEventBus,
        producer: TaskLifecycleProducer,
    }

    fn fixture() -> Fixture {
        let metrics = PipelineMetrics::new();
        let bus = InMemoryEventBus::new(BusConfig::default(), Arc::clone(&metrics));
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let producer = TaskLifecycleProducer::new(store, Arc::new(bus.clone()), metrics);
        Fixture { bus, producer }
    }

    async fn recv_event(sub: &mut crate::events::Subscription) -> TaskEvent {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn test_create_emits_created_event() {
        let f = fixture();
        let mut sub = f.bus.subscribe(&[topics::TASK_CREATED], "test");

        let owner = Uuid::new_v4();
        let task = f
            .producer
            .create(owner, NewTask::new(owner, "write changelog"))
            .await
            .unwrap();

        let event = recv_event(&mut sub).await;
        assert_eq!(event.topic(), topics::TASK_CREATED);
        assert_eq!(event.task_id(), task.id);
    }

    #[tokio::test]
    async fn test_update_carries_changes_map() {
        let f = fixture();
        let mut sub = f.bus.subscribe(&[topics::TASK_UPDATED], "test");

        let owner = Uuid::new_v4();
        let task = f
            .producer
            .create(owner, NewTask::new(owner, "write changelog"))
            .await
            .unwrap();

        let new_due = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let patch = TaskPatch {
            due_date: Some(new_due),
            ..Default::default()
        };
        f.producer.update(owner, task.id, patch).await.unwrap();

        let event = recv_event(&mut sub).await;
        match event.payload {
            TaskEventPayload::Updated { changes, task, .. } => {
                assert!(changes.contains_key("due_date"));
                assert_eq!(task.due_date, Some(new_due));
            }
            other => panic!("expected updated payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mutation_succeeds_when_publish_dead_letters() {
        let f = fixture();
        let _sub = f.bus.subscribe(&[topics::TASK_CREATED], "jammed");
        f.bus.inject_transient_failures(u32::MAX);

        let owner = Uuid::new_v4();
        let result = f
            .producer
            .create(owner, NewTask::new(owner, "still persists"))
            .await;
        // The store mutation is never coupled to publish outcome.
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_emits_nothing() {
        let f = fixture();
        let mut sub = f.bus.subscribe(&[topics::TASK_COMPLETED], "test");

        let result = f.producer.complete(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_complete_reports_completed_at() {
        let f = fixture();
        let mut sub = f.bus.subscribe(&[topics::TASK_COMPLETED], "test");

        let owner = Uuid::new_v4();
        let task = f
            .producer
            .create(owner, NewTask::new(owner, "close sprint"))
            .await
            .unwrap();
        let before = Utc::now() - ChronoDuration::seconds(1);
        f.producer.complete(owner, task.id).await.unwrap();

        let event = recv_event(&mut sub).await;
        match event.payload {
            TaskEventPayload::Completed { completed_at, .. } => {
                assert!(completed_at > before);
            }
            other => panic!("expected completed payload, got {other:?}"),
        }
    }
}
