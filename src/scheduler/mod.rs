//! # Reminder Scheduler
//!
//! Consumes lifecycle events and maintains the durable, time-ordered trigger
//! queue. All queue mutations run inside one owner task; event handlers, the
//! trigger tick, and the snapshot tick are arms of a single `select` loop, so
//! pop-and-trigger is atomic with respect to insert and cancel. External
//! callers talk to the owner through a bounded command channel, never through
//! shared memory.
//!
//! The in-memory heap is authoritative between snapshots. A snapshot write
//! failure is logged and retried on the next interval without ever blocking
//! triggering; losing the process before a snapshot loses only reminders
//! touched since the last one, which the periodic-snapshot design accepts.

pub mod queue;
pub mod snapshot;

pub use queue::ReminderQueue;
pub use snapshot::{InMemorySnapshotStore, PgSnapshotStore, SnapshotStore, REMINDER_SNAPSHOT_DDL};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ReminderConfig;
use crate::constants::{groups, topics};
use crate::dedup::DedupCache;
use crate::events::{
    EventBus, Subscription, TaskEvent, TaskEventPayload, REMINDER_TYPE_DUE_DATE,
};
use crate::metrics::PipelineMetrics;
use crate::models::reminder::{ReminderEntryStatus, ReminderScheduleEntry};
use crate::models::task::TaskSnapshot;

/// Commands accepted by the queue owner
enum SchedulerCommand {
    /// Process an event as if it arrived from the bus (test bridge).
    HandleEvent(TaskEvent),
    /// Run a trigger pass now; replies with the number of reminders fired.
    TickNow(oneshot::Sender<usize>),
    /// Snapshot the queue now; replies once the write settled either way.
    SnapshotNow(oneshot::Sender<()>),
    /// Reply with the current pending entries.
    Inspect(oneshot::Sender<Vec<ReminderScheduleEntry>>),
}

/// Client handle to a running scheduler
pub struct ReminderSchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    join: JoinHandle<()>,
}

impl ReminderSchedulerHandle {
    /// Inject an event directly, bypassing the bus. Intended for tests.
    pub async fn handle_event(&self, event: TaskEvent) {
        let _ = self
            .commands
            .send(SchedulerCommand::HandleEvent(event))
            .await;
    }

    /// Force a trigger pass and return how many reminders fired.
    pub async fn tick_now(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SchedulerCommand::TickNow(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Force a snapshot write.
    pub async fn snapshot_now(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(SchedulerCommand::SnapshotNow(tx))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Current pending entries, unordered.
    pub async fn pending_entries(&self) -> Vec<ReminderScheduleEntry> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SchedulerCommand::Inspect(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Wait for the owner task to exit after shutdown is signalled.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// The queue owner. Constructed by [`ReminderScheduler::start`]; all state is
/// private to the spawned task.
pub struct ReminderScheduler {
    queue: ReminderQueue,
    dedup: DedupCache,
    bus: Arc<dyn EventBus>,
    snapshots: Arc<dyn SnapshotStore>,
    config: ReminderConfig,
    metrics: Arc<PipelineMetrics>,
}

impl ReminderScheduler {
    /// Rebuild the queue from the snapshot store, subscribe to the lifecycle
    /// topics, and spawn the owner task. Entries already past due are fired in
    /// a catch-up pass before the first tick.
    pub async fn start(
        bus: Arc<dyn EventBus>,
        snapshots: Arc<dyn SnapshotStore>,
        config: ReminderConfig,
        metrics: Arc<PipelineMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> ReminderSchedulerHandle {
        let subscription = bus.subscribe(&topics::LIFECYCLE, groups::REMINDER_SCHEDULER);
        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity);

        let mut scheduler = Self {
            queue: ReminderQueue::new(),
            dedup: DedupCache::new(config.dedup_cache_size),
            bus,
            snapshots,
            config,
            metrics,
        };

        match scheduler.snapshots.load_pending().await {
            Ok(entries) => {
                let count = entries.len();
                for entry in entries {
                    scheduler.queue.insert(entry);
                }
                info!(restored = count, "reminder queue rebuilt from snapshot");
            }
            Err(err) => {
                scheduler.metrics.record_snapshot_failure();
                warn!(error = %err, "snapshot load failed; starting with an empty queue");
            }
        }

        let join = tokio::spawn(scheduler.run(subscription, command_rx, shutdown));
        ReminderSchedulerHandle {
            commands: command_tx,
            join,
        }
    }

    async fn run(
        mut self,
        mut subscription: Subscription,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // Catch-up pass for reminders that came due while the process was down.
        let caught_up = self.run_tick(Utc::now()).await;
        if caught_up > 0 {
            info!(count = caught_up, "catch-up pass fired overdue reminders");
        }

        let mut tick = tokio::time::interval(Duration::from_secs(self.config.tick_interval_seconds));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut snap =
            tokio::time::interval(Duration::from_secs(self.config.snapshot_interval_seconds));
        snap.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Both intervals fire immediately on the first poll; the catch-up pass
        // above already covered that tick.
        tick.reset();
        snap.reset();

        loop {
            tokio::select! {
                maybe_event = subscription.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event, Utc::now()).await,
                        None => {
                            warn!("lifecycle subscription closed; scheduler stopping");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.run_tick(Utc::now()).await;
                }
                _ = snap.tick() => {
                    self.write_snapshot().await;
                }
                Some(command) = commands.recv() => {
                    match command {
                        SchedulerCommand::HandleEvent(event) => {
                            self.handle_event(event, Utc::now()).await;
                        }
                        SchedulerCommand::TickNow(reply) => {
                            let fired = self.run_tick(Utc::now()).await;
                            let _ = reply.send(fired);
                        }
                        SchedulerCommand::SnapshotNow(reply) => {
                            self.write_snapshot().await;
                            let _ = reply.send(());
                        }
                        SchedulerCommand::Inspect(reply) => {
                            let _ = reply.send(self.queue.pending_entries());
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Leave the most current queue state behind for the next start.
        self.write_snapshot().await;
        info!("reminder scheduler stopped");
    }

    async fn handle_event(&mut self, event: TaskEvent, now: DateTime<Utc>) {
        if !self.dedup.insert(event.event_id) {
            self.metrics.record_duplicate_skipped();
            debug!(event_id = %event.event_id, "duplicate event skipped");
            return;
        }
        self.metrics.record_event_consumed();

        match &event.payload {
            TaskEventPayload::Created { task, .. } | TaskEventPayload::Updated { task, .. } => {
                self.schedule_from_snapshot(task, now).await;
            }
            TaskEventPayload::Completed { task_id, .. }
            | TaskEventPayload::Deleted { task_id, .. } => {
                self.cancel_pending(*task_id, now).await;
            }
            TaskEventPayload::ReminderTriggered { .. } => {
                // Not subscribed; tolerated for the direct-injection path.
            }
        }
    }

    /// Schedule, reschedule, or cancel based on the task's current due date
    /// and reminder offset. A task has at most one active reminder.
    async fn schedule_from_snapshot(&mut self, task: &TaskSnapshot, now: DateTime<Utc>) {
        let Some(trigger_at) = task.reminder_trigger_at() else {
            // Due date or offset removed: any pending reminder is now stale.
            self.cancel_pending(task.id, now).await;
            return;
        };
        // reminder_trigger_at is Some only when due_date is present.
        let Some(due_date) = task.due_date else {
            return;
        };

        let entry = ReminderScheduleEntry::pending(task.id, task.owner_id, trigger_at, due_date, now);
        if trigger_at <= now {
            // Already past: fire without ever entering the queue.
            if let Some(replaced) = self.queue.cancel(task.id) {
                self.mark_entry(&replaced, ReminderEntryStatus::Cancelled, now).await;
            }
            self.fire(entry, now).await;
        } else {
            debug!(task_id = %task.id, trigger_at = %trigger_at, "reminder scheduled");
            if let Some(replaced) = self.queue.insert(entry) {
                self.mark_entry(&replaced, ReminderEntryStatus::Cancelled, now).await;
            }
        }
    }

    async fn cancel_pending(&mut self, task_id: Uuid, now: DateTime<Utc>) {
        if let Some(cancelled) = self.queue.cancel(task_id) {
            self.metrics.record_reminder_cancelled();
            debug!(task_id = %task_id, reminder_id = %cancelled.reminder_id, "reminder cancelled");
            self.mark_entry(&cancelled, ReminderEntryStatus::Cancelled, now).await;
        }
    }

    /// Pop and fire everything due at or before `now`.
    async fn run_tick(&mut self, now: DateTime<Utc>) -> usize {
        let due = self.queue.pop_due(now);
        let fired = due.len();
        for entry in due {
            self.fire(entry, now).await;
        }
        fired
    }

    async fn fire(&mut self, mut entry: ReminderScheduleEntry, now: DateTime<Utc>) {
        let event = TaskEvent::new(TaskEventPayload::ReminderTriggered {
            task_id: entry.task_id,
            user_id: entry.owner_id,
            reminder_type: REMINDER_TYPE_DUE_DATE.to_string(),
            due_date: entry.due_date,
        });

        match self.bus.publish(topics::TASK_REMINDER_TRIGGERED, &event).await {
            Ok(_) => {
                self.metrics.record_reminder_triggered();
                info!(task_id = %entry.task_id, reminder_id = %entry.reminder_id, "reminder triggered");
            }
            Err(err) => {
                // The reminder is consumed either way; the bus already parked
                // the event on the dead-letter channel.
                self.metrics.record_publish_failure();
                warn!(
                    task_id = %entry.task_id,
                    error = %err,
                    "reminder trigger publish failed"
                );
            }
        }

        entry.status = ReminderEntryStatus::Triggered;
        entry.updated_at = now;
        self.mark_entry(&entry, ReminderEntryStatus::Triggered, now).await;
    }

    /// Best-effort durable status transition. Failures are counted and left
    /// for the next full snapshot to reconcile.
    async fn mark_entry(
        &self,
        entry: &ReminderScheduleEntry,
        status: ReminderEntryStatus,
        at: DateTime<Utc>,
    ) {
        if let Err(err) = self.snapshots.mark(entry.reminder_id, status, at).await {
            self.metrics.record_snapshot_failure();
            debug!(reminder_id = %entry.reminder_id, error = %err, "status mark deferred to next snapshot");
        }
    }

    async fn write_snapshot(&mut self) {
        let pending = self.queue.pending_entries();
        match self.snapshots.replace_pending(&pending).await {
            Ok(()) => debug!(entries = pending.len(), "reminder queue snapshotted"),
            Err(err) => {
                self.metrics.record_snapshot_failure();
                warn!(error = %err, "snapshot write failed; queue remains authoritative in memory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::events::InMemoryEventBus;
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        bus: InMemoryEventBus,
        snapshots: Arc<InMemorySnapshotStore>,
        metrics: Arc<PipelineMetrics>,
        shutdown_tx: watch::Sender<bool>,
    }

    impl Fixture {
        fn new() -> Self {
            let metrics = PipelineMetrics::new();
            let (shutdown_tx, _) = watch::channel(false);
            Self {
                bus: InMemoryEventBus::new(BusConfig::default(), Arc::clone(&metrics)),
                snapshots: Arc::new(InMemorySnapshotStore::new()),
                metrics,
                shutdown_tx,
            }
        }

        async fn start_scheduler(&self) -> ReminderSchedulerHandle {
            ReminderScheduler::start(
                Arc::new(self.bus.clone()),
                Arc::clone(&self.snapshots) as Arc<dyn SnapshotStore>,
                ReminderConfig::default(),
                Arc::clone(&self.metrics),
                self.shutdown_tx.subscribe(),
            )
            .await
        }
    }

    fn created_event(task_id: Uuid, owner: Uuid, due_in: ChronoDuration, offset: i64) -> TaskEvent {
        TaskEvent::new(TaskEventPayload::Created {
            actor_id: owner,
            task: TaskSnapshot {
                id: task_id,
                owner_id: owner,
                title: "water the plants".to_string(),
                description: None,
                due_date: Some(Utc::now() + due_in),
                recurrence_pattern: None,
                reminder_offset: Some(offset),
            },
        })
    }

    #[tokio::test]
    async fn test_created_event_schedules_trigger_at_due_minus_offset() {
        let f = Fixture::new();
        let handle = f.start_scheduler().await;

        let task_id = Uuid::new_v4();
        let event = created_event(task_id, Uuid::new_v4(), ChronoDuration::hours(1), 600);
        let expected = match &event.payload {
            TaskEventPayload::Created { task, .. } => task.reminder_trigger_at().unwrap(),
            _ => unreachable!(),
        };
        handle.handle_event(event).await;

        let pending = handle.pending_entries().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, task_id);
        assert_eq!(pending[0].trigger_at, expected);
    }

    #[tokio::test]
    async fn test_past_trigger_fires_immediately() {
        let f = Fixture::new();
        let mut reminders = f
            .bus
            .subscribe(&[topics::TASK_REMINDER_TRIGGERED], "observer");
        let handle = f.start_scheduler().await;

        let task_id = Uuid::new_v4();
        // Due in one minute with a ten-minute offset: already past.
        handle
            .handle_event(created_event(task_id, Uuid::new_v4(), ChronoDuration::minutes(1), 600))
            .await;

        let fired = tokio::time::timeout(std::time::Duration::from_secs(1), reminders.recv())
            .await
            .expect("reminder did not fire")
            .unwrap();
        assert_eq!(fired.task_id(), task_id);
        assert!(handle.pending_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_completion_cancels_before_trigger() {
        let f = Fixture::new();
        let mut reminders = f
            .bus
            .subscribe(&[topics::TASK_REMINDER_TRIGGERED], "observer");
        let handle = f.start_scheduler().await;

        let task_id = Uuid::new_v4();
        handle
            .handle_event(created_event(task_id, Uuid::new_v4(), ChronoDuration::hours(1), 600))
            .await;
        handle
            .handle_event(TaskEvent::new(TaskEventPayload::Completed {
                actor_id: Uuid::new_v4(),
                task_id,
                completed_at: Utc::now(),
            }))
            .await;

        assert_eq!(handle.tick_now().await, 0);
        assert!(handle.pending_entries().await.is_empty());
        assert!(reminders.try_recv().is_none());
        assert_eq!(f.metrics.snapshot().reminders_cancelled, 1);
    }

    #[tokio::test]
    async fn test_duplicate_event_schedules_once() {
        let f = Fixture::new();
        let handle = f.start_scheduler().await;

        let event = created_event(Uuid::new_v4(), Uuid::new_v4(), ChronoDuration::hours(1), 600);
        handle.handle_event(event.clone()).await;
        handle.handle_event(event).await;

        assert_eq!(handle.pending_entries().await.len(), 1);
        assert_eq!(f.metrics.snapshot().duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn test_update_replaces_pending_entry() {
        let f = Fixture::new();
        let handle = f.start_scheduler().await;

        let task_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        handle
            .handle_event(created_event(task_id, owner, ChronoDuration::hours(1), 600))
            .await;

        let new_due = Utc::now() + ChronoDuration::hours(4);
        handle
            .handle_event(TaskEvent::new(TaskEventPayload::Updated {
                actor_id: owner,
                task_id,
                changes: Default::default(),
                task: TaskSnapshot {
                    id: task_id,
                    owner_id: owner,
                    title: "water the plants".to_string(),
                    description: None,
                    due_date: Some(new_due),
                    recurrence_pattern: None,
                    reminder_offset: Some(600),
                },
            }))
            .await;

        let pending = handle.pending_entries().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].trigger_at, new_due - ChronoDuration::seconds(600));
    }

    #[tokio::test]
    async fn test_snapshot_restart_preserves_trigger_at() {
        let f = Fixture::new();
        let handle = f.start_scheduler().await;

        let task_id = Uuid::new_v4();
        handle
            .handle_event(created_event(task_id, Uuid::new_v4(), ChronoDuration::hours(2), 900))
            .await;
        let before = handle.pending_entries().await;
        handle.snapshot_now().await;

        // Simulate a restart: a fresh scheduler over the same snapshot store.
        let restarted = f.start_scheduler().await;
        let after = restarted.pending_entries().await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].trigger_at, before[0].trigger_at);
        assert_eq!(after[0].reminder_id, before[0].reminder_id);
    }

    #[tokio::test]
    async fn test_overdue_snapshot_rows_fire_on_startup() {
        let f = Fixture::new();
        let mut reminders = f
            .bus
            .subscribe(&[topics::TASK_REMINDER_TRIGGERED], "observer");

        let overdue = ReminderScheduleEntry::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now() - ChronoDuration::minutes(30),
            Utc::now() - ChronoDuration::minutes(15),
            Utc::now() - ChronoDuration::hours(1),
        );
        f.snapshots.replace_pending(&[overdue.clone()]).await.unwrap();

        let handle = f.start_scheduler().await;
        let fired = tokio::time::timeout(std::time::Duration::from_secs(1), reminders.recv())
            .await
            .expect("catch-up pass did not fire")
            .unwrap();
        assert_eq!(fired.task_id(), overdue.task_id);
        assert!(handle.pending_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_failure_does_not_block_triggering() {
        let f = Fixture::new();
        let mut reminders = f
            .bus
            .subscribe(&[topics::TASK_REMINDER_TRIGGERED], "observer");
        let handle = f.start_scheduler().await;

        f.snapshots.inject_failures(10);
        let task_id = Uuid::new_v4();
        handle
            .handle_event(created_event(task_id, Uuid::new_v4(), ChronoDuration::minutes(1), 600))
            .await;

        let fired = tokio::time::timeout(std::time::Duration::from_secs(1), reminders.recv())
            .await
            .expect("trigger blocked by snapshot failure")
            .unwrap();
        assert_eq!(fired.task_id(), task_id);
        assert!(f.metrics.snapshot().snapshot_failures > 0);
    }
}
