//! # Event Bus Abstraction
//!
//! Uniform publish/subscribe seam over a pluggable broker. The abstraction
//! owns retries and dead-lettering: transient failures are retried with
//! exponential backoff, and an event that exhausts its attempts lands on the
//! dead-letter channel while the caller receives a `PublishError` to act on.
//!
//! Guarantees: at-least-once delivery to each distinct consumer group, and
//! publish-order delivery of same-task events within a topic. Nothing is
//! guaranteed across topics or across groups.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::events::types::TaskEvent;

/// Broker acknowledgement for a successful publish
#[derive(Debug, Clone)]
pub struct Ack {
    pub topic: String,
    pub event_id: Uuid,
}

/// Publish failure surfaced to callers. Callers of record (the producer, the
/// reminder scheduler) log and count these rather than failing the operation
/// that generated the event.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("transient broker error on {topic}: {message}")]
    Transient { topic: String, message: String },

    #[error("event {event_id} dead-lettered after {attempts} attempts on {topic}")]
    DeadLettered {
        topic: String,
        event_id: Uuid,
        attempts: u32,
    },

    #[error("broker unavailable: {message}")]
    Unavailable { message: String },
}

/// An event that exhausted its delivery attempts, parked for inspection
#[derive(Debug, Clone)]
pub struct DeadLetteredEvent {
    pub topic: String,
    pub group: String,
    pub event: TaskEvent,
    pub attempts: u32,
    pub reason: String,
}

/// A consumer group's inbound event stream. Dropping the subscription (or
/// calling [`Subscription::cancel`]) detaches the group from the bus.
pub struct Subscription {
    pub(crate) group: String,
    pub(crate) rx: mpsc::Receiver<TaskEvent>,
    pub(crate) canceller: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Receive the next event; `None` once the bus side closes or the
    /// subscription is cancelled.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for drain loops and tests.
    pub fn try_recv(&mut self) -> Option<TaskEvent> {
        self.rx.try_recv().ok()
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Detach the group from the bus. Buffered events may still be received.
    pub fn cancel(&mut self) {
        if let Some(canceller) = self.canceller.take() {
            canceller();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Publish/subscribe seam over the underlying broker
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic. Applies the retry/backoff policy before
    /// returning; a `DeadLettered` error means the event is parked, not lost.
    async fn publish(&self, topic: &str, event: &TaskEvent) -> Result<Ack, PublishError>;

    /// Subscribe a consumer group to one or more topics, receiving a single
    /// merged, publish-ordered stream. Re-subscribing an existing group
    /// replaces its prior registration.
    fn subscribe(&self, topics: &[&str], group: &str) -> Subscription;

    /// Events that exhausted their delivery attempts, oldest first.
    fn dead_letters(&self) -> Vec<DeadLetteredEvent>;
}
