//! # Audit Log Writer
//!
//! Consumes every lifecycle event, buffers in memory, and flushes batches to
//! the append-only store on whichever comes first: 100 entries or one second.
//! Each flush deduplicates on event id; the store's primary key catches
//! duplicates that straddle flushes. Shutdown drains the buffer before exit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::store::{AuditEntry, AuditStore};
use crate::config::AuditConfig;
use crate::constants::{groups, topics};
use crate::events::{EventBus, Subscription, TaskEvent};
use crate::metrics::PipelineMetrics;

/// Upper bound on buffered entries across failed flushes. Beyond this the
/// oldest entries are shed once the store has been unreachable for many flush
/// intervals by then.
const MAX_RETAINED_ENTRIES: usize = 10_000;

enum WriterCommand {
    /// Process an event as if it arrived from the bus (test bridge).
    HandleEvent(TaskEvent),
    /// Flush the buffer now; replies with the number of entries written.
    FlushNow(oneshot::Sender<usize>),
}

/// Client handle to a running audit writer
pub struct AuditWriterHandle {
    commands: mpsc::Sender<WriterCommand>,
    join: JoinHandle<()>,
}

impl AuditWriterHandle {
    /// Inject an event directly, bypassing the bus. Intended for tests.
    pub async fn handle_event(&self, event: TaskEvent) {
        let _ = self.commands.send(WriterCommand::HandleEvent(event)).await;
    }

    /// Force a flush; returns the number of entries written.
    pub async fn flush_now(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(WriterCommand::FlushNow(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// The audit consumer
pub struct AuditLogWriter {
    buffer: Vec<AuditEntry>,
    store: Arc<dyn AuditStore>,
    config: AuditConfig,
    metrics: Arc<PipelineMetrics>,
}

impl AuditLogWriter {
    /// Subscribe to every topic and spawn the writer loop.
    pub fn start(
        bus: Arc<dyn EventBus>,
        store: Arc<dyn AuditStore>,
        config: AuditConfig,
        metrics: Arc<PipelineMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> AuditWriterHandle {
        let subscription = bus.subscribe(&topics::ALL, groups::AUDIT_LOG);
        let (command_tx, command_rx) = mpsc::channel(256);

        let writer = Self {
            buffer: Vec::with_capacity(config.flush_max_entries),
            store,
            config,
            metrics,
        };
        let join = tokio::spawn(writer.run(subscription, command_rx, shutdown));
        AuditWriterHandle {
            commands: command_tx,
            join,
        }
    }

    async fn run(
        mut self,
        mut subscription: Subscription,
        mut commands: mpsc::Receiver<WriterCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut flush_tick =
            tokio::time::interval(Duration::from_millis(self.config.flush_interval_ms));
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        flush_tick.reset();

        loop {
            tokio::select! {
                maybe_event = subscription.recv() => {
                    match maybe_event {
                        Some(event) => {
                            self.buffer_event(event);
                            if self.buffer.len() >= self.config.flush_max_entries {
                                self.flush().await;
                            }
                        }
                        None => {
                            warn!("event subscription closed; audit writer stopping");
                            break;
                        }
                    }
                }
                _ = flush_tick.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush().await;
                    }
                }
                Some(command) = commands.recv() => {
                    match command {
                        WriterCommand::HandleEvent(event) => {
                            self.buffer_event(event);
                            if self.buffer.len() >= self.config.flush_max_entries {
                                self.flush().await;
                            }
                        }
                        WriterCommand::FlushNow(reply) => {
                            let written = self.flush().await;
                            let _ = reply.send(written);
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

        // Drain whatever already reached the subscription, then flush so no
        // accepted event is lost to shutdown.
        while let Some(event) = subscription.try_recv() {
            self.buffer_event(event);
        }
        self.flush().await;
        info!("audit log writer stopped");
    }

    fn buffer_event(&mut self, event: TaskEvent) {
        self.metrics.record_event_consumed();
        match AuditEntry::from_event(&event) {
            Ok(entry) => self.buffer.push(entry),
            Err(err) => {
                warn!(event_id = %event.event_id, error = %err, "unrecordable event rejected");
            }
        }
    }

    /// Deduplicate the buffer on event id and append it as one batch. On
    /// store failure the batch is retained for the next flush, bounded by
    /// [`MAX_RETAINED_ENTRIES`].
    async fn flush(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }

        let mut seen: HashSet<Uuid> = HashSet::with_capacity(self.buffer.len());
        let mut batch: Vec<AuditEntry> = Vec::with_capacity(self.buffer.len());
        for entry in self.buffer.drain(..) {
            if seen.insert(entry.event_id) {
                batch.push(entry);
            } else {
                self.metrics.record_duplicate_skipped();
            }
        }

        match self.store.append(&batch).await {
            Ok(written) => {
                self.metrics.record_audit_entries_written(written as u64);
                debug!(batch = batch.len(), written, "audit batch flushed");
                written
            }
            Err(err) => {
                warn!(error = %err, batch = batch.len(), "audit flush failed; retaining batch");
                self.buffer = batch;
                if self.buffer.len() > MAX_RETAINED_ENTRIES {
                    let shed = self.buffer.len() - MAX_RETAINED_ENTRIES;
                    self.buffer.drain(..shed);
                    warn!(shed, "audit buffer over retention bound; oldest entries shed");
                }
                0
            }
        }
    }
}
