//! # Recurring Task Processor
//!
//! Periodic batch job that materializes due instances of recurring tasks.
//! Runs under a leased lock so only one replica generates at a time, and
//! creates instances exclusively through the lifecycle producer; this
//! component never publishes events itself. Idempotency under concurrent or
//! duplicate runs rests on the store's `(parent, occurrence_date)` uniqueness
//! constraint: a conflict on creation is an "already generated" outcome, not
//! an error.

pub mod lease;

pub use lease::{InMemoryLeaseLock, LeaseLock, PgLeaseLock, GENERATION_LEASE_DDL};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RecurringConfig;
use crate::constants::SYSTEM_ACTOR;
use crate::metrics::PipelineMetrics;
use crate::models::{NewTask, Task};
use crate::producer::TaskLifecycleProducer;
use crate::store::{StoreError, TaskStore};

/// Result of one generation scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Instances created this scan
    pub generated: usize,
    /// Creation attempts that lost the uniqueness race (treated as success)
    pub conflicts: usize,
    /// True when another replica held the lease and the scan did nothing
    pub lease_held_elsewhere: bool,
}

enum ProcessorCommand {
    /// Run a scan now; replies with the outcome.
    ScanNow(oneshot::Sender<ScanOutcome>),
}

/// Client handle to a running processor
pub struct RecurringProcessorHandle {
    commands: mpsc::Sender<ProcessorCommand>,
    join: JoinHandle<()>,
}

impl RecurringProcessorHandle {
    /// Force a scan and return its outcome.
    pub async fn scan_now(&self) -> ScanOutcome {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(ProcessorCommand::ScanNow(tx)).await.is_err() {
            return ScanOutcome::default();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// The generation batch job
pub struct RecurringTaskProcessor {
    producer: Arc<TaskLifecycleProducer>,
    store: Arc<dyn TaskStore>,
    lease: Arc<dyn LeaseLock>,
    config: RecurringConfig,
    metrics: Arc<PipelineMetrics>,
    /// Lease holder identity for this replica
    instance_id: String,
}

impl RecurringTaskProcessor {
    pub fn new(
        producer: Arc<TaskLifecycleProducer>,
        store: Arc<dyn TaskStore>,
        lease: Arc<dyn LeaseLock>,
        config: RecurringConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let instance_id = format!("recurring-{}", Uuid::new_v4());
        Self {
            producer,
            store,
            lease,
            config,
            metrics,
            instance_id,
        }
    }

    /// Spawn the periodic scan loop.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> RecurringProcessorHandle {
        let (command_tx, command_rx) = mpsc::channel(64);
        let join = tokio::spawn(self.run(command_rx, shutdown));
        RecurringProcessorHandle {
            commands: command_tx,
            join,
        }
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<ProcessorCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut scan_tick =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_seconds));
        scan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = scan_tick.tick() => {
                    self.scan_once(Utc::now()).await;
                }
                Some(command) = commands.recv() => {
                    match command {
                        ProcessorCommand::ScanNow(reply) => {
                            let _ = reply.send(self.scan_once(Utc::now()).await);
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
        info!("recurring task processor stopped");
    }

    /// One generation pass at `now`, taking the lease for its duration.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> ScanOutcome {
        let ttl = ChronoDuration::seconds(self.config.lease_ttl_seconds as i64);
        match self
            .lease
            .try_acquire(&self.config.lease_key, &self.instance_id, ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("generation lease held elsewhere; skipping scan");
                return ScanOutcome {
                    lease_held_elsewhere: true,
                    ..Default::default()
                };
            }
            Err(err) => {
                warn!(error = %err, "lease acquisition failed; skipping scan");
                return ScanOutcome {
                    lease_held_elsewhere: true,
                    ..Default::default()
                };
            }
        }

        let outcome = self.generate(now).await;
        if let Err(err) = self
            .lease
            .release(&self.config.lease_key, &self.instance_id)
            .await
        {
            // The TTL reclaims an unreleased lease; nothing else to do.
            warn!(error = %err, "lease release failed");
        }
        outcome
    }

    async fn generate(&self, now: DateTime<Utc>) -> ScanOutcome {
        let parents = match self.store.active_recurring(now).await {
            Ok(parents) => parents,
            Err(err) => {
                warn!(error = %err, "recurring scan query failed");
                return ScanOutcome::default();
            }
        };

        let mut outcome = ScanOutcome::default();
        for parent in parents {
            match self.generate_for_parent(&parent, now).await {
                Ok(Some(true)) => outcome.generated += 1,
                Ok(Some(false)) => outcome.conflicts += 1,
                Ok(None) => {}
                Err(err) => {
                    // Per-task failures never halt the scan.
                    warn!(task_id = %parent.id, error = %err, "instance generation failed");
                }
            }
        }

        if outcome.generated > 0 || outcome.conflicts > 0 {
            info!(
                generated = outcome.generated,
                conflicts = outcome.conflicts,
                "recurring scan complete"
            );
        }
        outcome
    }

    /// Returns `Some(true)` when an instance was created, `Some(false)` on a
    /// uniqueness conflict, `None` when nothing was due.
    async fn generate_for_parent(
        &self,
        parent: &Task,
        now: DateTime<Utc>,
    ) -> Result<Option<bool>, StoreError> {
        let Some(pattern) = parent.recurrence()? else {
            return Ok(None);
        };
        let Some(due_date) = parent.due_date else {
            // Unreachable under the store's invariant checks.
            return Err(StoreError::Validation {
                message: format!("recurring task {} has no due date", parent.id),
            });
        };
        let Some(occurrence) = pattern.occurrence_for(due_date, now) else {
            return Ok(None);
        };

        if self.store.instance_exists(parent.id, occurrence).await? {
            return Ok(None);
        }

        let instance_due = DateTime::<Utc>::from_naive_utc_and_offset(
            occurrence.and_time(due_date.time()),
            Utc,
        );
        let mut instance = NewTask::new(parent.owner_id, parent.title.clone());
        instance.description = parent.description.clone();
        instance.due_date = Some(instance_due);
        instance.parent_task_id = Some(parent.id);
        instance.occurrence_date = Some(occurrence);
        instance.reminder_offset_seconds = parent.reminder_offset_seconds;

        match self.producer.create(SYSTEM_ACTOR, instance).await {
            Ok(task) => {
                self.metrics.record_instance_generated();
                debug!(
                    parent_id = %parent.id,
                    instance_id = %task.id,
                    occurrence = %occurrence,
                    "recurring instance materialized"
                );
                Ok(Some(true))
            }
            Err(StoreError::Conflict { .. }) => {
                // Another replica (or an earlier run) won the race.
                self.metrics.record_generation_conflict();
                Ok(Some(false))
            }
            Err(other) => Err(other),
        }
    }
}
