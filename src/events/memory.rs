//! # In-Memory Event Broker
//!
//! Channel-backed implementation of [`EventBus`] used by the test suite, the
//! demo server, and any deployment where the pipeline runs in-process with
//! its producers. Each consumer group owns one bounded FIFO channel; a topic
//! publish fans out to every group subscribed to that topic. Backpressure is
//! expressed through channel capacity: a full group channel is a transient
//! error, retried with backoff and dead-lettered on exhaustion.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::BusConfig;
use crate::events::bus::{Ack, DeadLetteredEvent, EventBus, PublishError, Subscription};
use crate::events::types::TaskEvent;
use crate::metrics::PipelineMetrics;

struct GroupRegistration {
    topics: HashSet<String>,
    tx: mpsc::Sender<TaskEvent>,
}

struct BusInner {
    groups: RwLock<HashMap<String, GroupRegistration>>,
    dead_letters: Mutex<Vec<DeadLetteredEvent>>,
    injected_failures: AtomicU32,
}

/// In-memory broker with per-group bounded channels
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<BusInner>,
    config: BusConfig,
    metrics: Arc<PipelineMetrics>,
}

impl InMemoryEventBus {
    pub fn new(config: BusConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                groups: RwLock::new(HashMap::new()),
                dead_letters: Mutex::new(Vec::new()),
                injected_failures: AtomicU32::new(0),
            }),
            config,
            metrics,
        }
    }

    /// Fail the next `count` publish attempts with a transient error. Test
    /// hook for exercising the retry and dead-letter paths.
    pub fn inject_transient_failures(&self, count: u32) {
        self.inner.injected_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// One delivery attempt to every group still pending; groups whose
    /// channels were full remain in `pending` for the next retry.
    fn attempt_delivery(&self, event: &TaskEvent, pending: &mut Vec<String>) {
        let groups = self.inner.groups.read();
        pending.retain(|group_name| {
            let Some(registration) = groups.get(group_name) else {
                // Group unsubscribed mid-retry; nothing left to deliver.
                return false;
            };
            match registration.tx.try_send(event.clone()) {
                Ok(()) => false,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Receiver dropped without cancelling; treat as detached.
                    false
                }
            }
        });
    }

    fn subscribed_groups(&self, topic: &str) -> Vec<String> {
        self.inner
            .groups
            .read()
            .iter()
            .filter(|(_, reg)| reg.topics.contains(topic))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn park_dead_letter(&self, topic: &str, group: &str, event: &TaskEvent, attempts: u32) {
        warn!(
            topic,
            group,
            event_id = %event.event_id,
            attempts,
            "event dead-lettered"
        );
        self.metrics.record_event_dead_lettered();
        self.inner.dead_letters.lock().push(DeadLetteredEvent {
            topic: topic.to_string(),
            group: group.to_string(),
            event: event.clone(),
            attempts,
            reason: "consumer group channel full".to_string(),
        });
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, event: &TaskEvent) -> Result<Ack, PublishError> {
        let max_attempts = self.config.publish_max_attempts;
        let mut pending = self.subscribed_groups(topic);

        let mut attempt = 0;
        loop {
            if self.take_injected_failure() {
                if attempt + 1 >= max_attempts {
                    for group in &pending {
                        self.park_dead_letter(topic, group, event, max_attempts);
                    }
                    return Err(PublishError::DeadLettered {
                        topic: topic.to_string(),
                        event_id: event.event_id,
                        attempts: max_attempts,
                    });
                }
                attempt += 1;
                tokio::time::sleep(self.config.backoff_for_attempt(attempt - 1)).await;
                continue;
            }

            self.attempt_delivery(event, &mut pending);
            if pending.is_empty() {
                debug!(topic, event_id = %event.event_id, "event published");
                self.metrics.record_event_published();
                return Ok(Ack {
                    topic: topic.to_string(),
                    event_id: event.event_id,
                });
            }

            if attempt + 1 >= max_attempts {
                for group in &pending {
                    self.park_dead_letter(topic, group, event, max_attempts);
                }
                return Err(PublishError::DeadLettered {
                    topic: topic.to_string(),
                    event_id: event.event_id,
                    attempts: max_attempts,
                });
            }
            attempt += 1;
            tokio::time::sleep(self.config.backoff_for_attempt(attempt - 1)).await;
        }
    }

    fn subscribe(&self, topics: &[&str], group: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.group_channel_capacity);
        let registration = GroupRegistration {
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
            tx: tx.clone(),
        };
        if self
            .inner
            .groups
            .write()
            .insert(group.to_string(), registration)
            .is_some()
        {
            debug!(group, "replaced existing consumer group registration");
        }

        let inner = Arc::clone(&self.inner);
        let group_name = group.to_string();
        Subscription {
            group: group.to_string(),
            rx,
            canceller: Some(Box::new(move || {
                // Only detach our own registration; a replacement subscription
                // under the same group name must survive this cancel.
                let mut groups = inner.groups.write();
                if groups
                    .get(&group_name)
                    .is_some_and(|reg| reg.tx.same_channel(&tx))
                {
                    groups.remove(&group_name);
                }
            })),
        }
    }

    fn dead_letters(&self) -> Vec<DeadLetteredEvent> {
        self.inner.dead_letters.lock().clone()
    }
}
