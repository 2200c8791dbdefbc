//! # Notification Fan-out
//!
//! Consumes every lifecycle event and delivers formatted notifications to the
//! owning user's live connections. Delivery is best-effort: slow consumers
//! lose their oldest queued message, bursts coalesce, and nothing here ever
//! blocks the consumer loop. Heartbeats go out on a fixed cadence and idle
//! connections are pruned on the same tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::constants::{groups, topics};
use crate::dedup::DedupCache;
use crate::events::{EventBus, Subscription, TaskEvent};
use crate::metrics::PipelineMetrics;
use crate::notify::registry::{ConnectionRegistry, ReplayEntry};

enum FanoutCommand {
    /// Process an event as if it arrived from the bus (test bridge).
    HandleEvent(TaskEvent),
    /// Run the heartbeat-and-prune pass now; replies with pruned count.
    HeartbeatNow(oneshot::Sender<usize>),
}

/// Client handle to a running fan-out
pub struct NotificationFanoutHandle {
    commands: mpsc::Sender<FanoutCommand>,
    join: JoinHandle<()>,
}

impl NotificationFanoutHandle {
    /// Inject an event directly, bypassing the bus. Intended for tests.
    pub async fn handle_event(&self, event: TaskEvent) {
        let _ = self.commands.send(FanoutCommand::HandleEvent(event)).await;
    }

    /// Force a heartbeat/prune pass; returns the number of pruned streams.
    pub async fn heartbeat_now(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(FanoutCommand::HeartbeatNow(tx))
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// The fan-out consumer
pub struct NotificationFanout {
    registry: Arc<ConnectionRegistry>,
    dedup: DedupCache,
    config: NotifyConfig,
    metrics: Arc<PipelineMetrics>,
}

impl NotificationFanout {
    /// Subscribe to every topic and spawn the consumer loop.
    pub fn start(
        bus: Arc<dyn EventBus>,
        registry: Arc<ConnectionRegistry>,
        config: NotifyConfig,
        metrics: Arc<PipelineMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> NotificationFanoutHandle {
        let subscription = bus.subscribe(&topics::ALL, groups::NOTIFICATION_FANOUT);
        let (command_tx, command_rx) = mpsc::channel(256);

        let fanout = Self {
            registry,
            dedup: DedupCache::new(config.dedup_cache_size),
            config,
            metrics,
        };
        let join = tokio::spawn(fanout.run(subscription, command_rx, shutdown));
        NotificationFanoutHandle {
            commands: command_tx,
            join,
        }
    }

    async fn run(
        mut self,
        mut subscription: Subscription,
        mut commands: mpsc::Receiver<FanoutCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval_seconds));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.reset();

        loop {
            tokio::select! {
                maybe_event = subscription.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event),
                        None => {
                            warn!("event subscription closed; fan-out stopping");
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    self.heartbeat_pass();
                }
                Some(command) = commands.recv() => {
                    match command {
                        FanoutCommand::HandleEvent(event) => self.handle_event(event),
                        FanoutCommand::HeartbeatNow(reply) => {
                            let _ = reply.send(self.heartbeat_pass());
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

        for connection in self.registry.all_connections() {
            connection.close();
        }
        info!("notification fan-out stopped");
    }

    fn handle_event(&mut self, event: TaskEvent) {
        if !self.dedup.insert(event.event_id) {
            self.metrics.record_duplicate_skipped();
            debug!(event_id = %event.event_id, "duplicate event skipped");
            return;
        }
        self.metrics.record_event_consumed();

        let owner_id = event.interested_user();
        let event_name = event.topic();
        let data = match event.to_json() {
            Ok(data) => data,
            Err(err) => {
                warn!(event_id = %event.event_id, error = %err, "unserializable event dropped");
                return;
            }
        };

        self.registry.record_replay(
            owner_id,
            ReplayEntry {
                event_name,
                event_id: event.event_id,
                data: data.clone(),
            },
        );

        let connections = self.registry.connections_for(owner_id);
        if connections.is_empty() {
            debug!(owner_id = %owner_id, event_name, "no live streams for owner");
            return;
        }
        for connection in connections {
            connection.enqueue_event(event_name, event.event_id, data.clone(), &self.metrics);
            self.metrics.record_notification_delivered();
        }
    }

    /// Enqueue a heartbeat on every live connection, then prune streams that
    /// have been silent past the idle timeout.
    fn heartbeat_pass(&self) -> usize {
        for connection in self.registry.all_connections() {
            connection.enqueue_heartbeat(&self.metrics);
        }
        self.registry.prune_idle(chrono::Utc::now())
    }
}
