//! # Notification Connections
//!
//! One `NotificationConnection` per live stream, backed by a bounded outbound
//! queue. Backpressure never blocks the event-consumption path: a full queue
//! drops the oldest message and counts it. A per-second rate limit coalesces
//! bursts into a single "multiple updates" notification.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::NotifyConfig;
use crate::metrics::PipelineMetrics;

/// SSE event name used for coalesced burst notifications
pub const COALESCED_EVENT_NAME: &str = "multiple_updates";
/// SSE event name used for heartbeats
pub const HEARTBEAT_EVENT_NAME: &str = "heartbeat";

/// A message queued for delivery on one connection
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A formatted lifecycle event; `event_name` is the topic.
    Event {
        event_name: &'static str,
        event_id: Uuid,
        data: serde_json::Value,
    },
    /// Stand-in for messages suppressed by the rate limiter.
    Coalesced { suppressed: u32 },
    Heartbeat,
}

struct RateWindow {
    window_start: DateTime<Utc>,
    count: u32,
}

/// A live client stream registered with the fan-out. Ephemeral: never
/// persisted, rebuilt from nothing on process restart.
pub struct NotificationConnection {
    pub connection_id: Uuid,
    pub owner_id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub client_addr: Option<String>,
    queue: Mutex<VecDeque<OutboundMessage>>,
    wakeup: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    last_activity: Mutex<DateTime<Utc>>,
    rate: Mutex<RateWindow>,
    capacity: usize,
    rate_limit_per_second: u32,
}

impl NotificationConnection {
    pub fn new(owner_id: Uuid, client_addr: Option<String>, config: &NotifyConfig) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            connection_id: Uuid::new_v4(),
            owner_id,
            connected_at: now,
            client_addr,
            queue: Mutex::new(VecDeque::with_capacity(config.outbox_capacity)),
            wakeup: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            last_activity: Mutex::new(now),
            rate: Mutex::new(RateWindow {
                window_start: now,
                count: 0,
            }),
            capacity: config.outbox_capacity,
            rate_limit_per_second: config.rate_limit_per_second,
        })
    }

    /// Queue a lifecycle event, applying the per-second rate limit. Excess
    /// messages within a window merge into one trailing coalesced marker.
    pub fn enqueue_event(
        &self,
        event_name: &'static str,
        event_id: Uuid,
        data: serde_json::Value,
        metrics: &PipelineMetrics,
    ) {
        if self.is_closed() {
            return;
        }
        let over_limit = {
            let mut rate = self.rate.lock();
            let now = Utc::now();
            if now - rate.window_start >= Duration::seconds(1) {
                rate.window_start = now;
                rate.count = 0;
            }
            rate.count += 1;
            rate.count > self.rate_limit_per_second
        };

        if over_limit {
            metrics.record_notification_coalesced();
            let mut queue = self.queue.lock();
            if let Some(OutboundMessage::Coalesced { suppressed }) = queue.back_mut() {
                *suppressed += 1;
            } else {
                Self::push_bounded(
                    &mut queue,
                    OutboundMessage::Coalesced { suppressed: 1 },
                    self.capacity,
                    &self.dropped,
                    metrics,
                );
            }
        } else {
            let mut queue = self.queue.lock();
            Self::push_bounded(
                &mut queue,
                OutboundMessage::Event {
                    event_name,
                    event_id,
                    data,
                },
                self.capacity,
                &self.dropped,
                metrics,
            );
        }
        self.wakeup.notify_one();
    }

    /// Queue a heartbeat. Heartbeats bypass the rate limiter; they are the
    /// liveness signal, not a notification.
    pub fn enqueue_heartbeat(&self, metrics: &PipelineMetrics) {
        if self.is_closed() {
            return;
        }
        let mut queue = self.queue.lock();
        Self::push_bounded(
            &mut queue,
            OutboundMessage::Heartbeat,
            self.capacity,
            &self.dropped,
            metrics,
        );
        drop(queue);
        self.wakeup.notify_one();
    }

    fn push_bounded(
        queue: &mut VecDeque<OutboundMessage>,
        message: OutboundMessage,
        capacity: usize,
        dropped: &AtomicU64,
        metrics: &PipelineMetrics,
    ) {
        queue.push_back(message);
        while queue.len() > capacity {
            queue.pop_front();
            dropped.fetch_add(1, Ordering::Relaxed);
            metrics.record_notification_dropped();
        }
    }

    /// Await the next message. Returns `None` once the connection is closed
    /// and the queue drained.
    pub async fn next_message(&self) -> Option<OutboundMessage> {
        loop {
            let notified = self.wakeup.notified();
            if let Some(message) = self.queue.lock().pop_front() {
                return Some(message);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Record client liveness (a successful write to the socket).
    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout_seconds: u64) -> bool {
        now - self.last_activity() >= Duration::seconds(idle_timeout_seconds as i64)
    }

    /// Close the connection; pending messages remain drainable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wakeup.notify_waiters();
        self.wakeup.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::topics;

    fn test_connection(capacity: usize, rate: u32) -> Arc<NotificationConnection> {
        let config = NotifyConfig {
            outbox_capacity: capacity,
            rate_limit_per_second: rate,
            ..Default::default()
        };
        NotificationConnection::new(Uuid::new_v4(), None, &config)
    }

    fn event_message(connection: &NotificationConnection, metrics: &PipelineMetrics) {
        connection.enqueue_event(
            topics::TASK_UPDATED,
            Uuid::new_v4(),
            serde_json::json!({"x": 1}),
            metrics,
        );
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let connection = test_connection(8, 100);
        let metrics = PipelineMetrics::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        connection.enqueue_event(topics::TASK_CREATED, first, serde_json::json!({}), &metrics);
        connection.enqueue_event(topics::TASK_UPDATED, second, serde_json::json!({}), &metrics);

        match connection.next_message().await.unwrap() {
            OutboundMessage::Event { event_id, .. } => assert_eq!(event_id, first),
            other => panic!("unexpected message: {other:?}"),
        }
        match connection.next_message().await.unwrap() {
            OutboundMessage::Event { event_id, .. } => assert_eq!(event_id, second),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let connection = test_connection(2, 100);
        let metrics = PipelineMetrics::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            connection.enqueue_event(topics::TASK_UPDATED, *id, serde_json::json!({}), &metrics);
        }

        assert_eq!(connection.dropped_count(), 1);
        assert_eq!(metrics.notifications_dropped(), 1);
        match connection.next_message().await.unwrap() {
            OutboundMessage::Event { event_id, .. } => assert_eq!(event_id, ids[1]),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_burst_coalesces_past_rate_limit() {
        let connection = test_connection(64, 10);
        let metrics = PipelineMetrics::new();
        for _ in 0..50 {
            event_message(&connection, &metrics);
        }

        // Ten events pass, the remaining forty merge into one marker.
        let mut delivered = 0;
        let mut coalesced_total = 0;
        while let Some(message) = {
            let maybe = connection.queued_len() > 0;
            if maybe {
                connection.next_message().await
            } else {
                None
            }
        } {
            match message {
                OutboundMessage::Event { .. } => delivered += 1,
                OutboundMessage::Coalesced { suppressed } => coalesced_total += suppressed,
                OutboundMessage::Heartbeat => {}
            }
        }
        assert_eq!(delivered, 10);
        assert_eq!(coalesced_total, 40);
        assert_eq!(metrics.snapshot().notifications_coalesced, 40);
    }

    #[tokio::test]
    async fn test_closed_connection_drains_then_ends() {
        let connection = test_connection(8, 100);
        let metrics = PipelineMetrics::new();
        event_message(&connection, &metrics);
        connection.close();

        assert!(connection.next_message().await.is_some());
        assert!(connection.next_message().await.is_none());
        // Post-close enqueues are ignored.
        event_message(&connection, &metrics);
        assert!(connection.next_message().await.is_none());
    }

    #[tokio::test]
    async fn test_idle_detection() {
        let connection = test_connection(8, 100);
        let now = Utc::now();
        assert!(!connection.is_idle(now, 60));
        assert!(connection.is_idle(now + Duration::seconds(61), 60));

        connection.touch();
        assert!(!connection.is_idle(Utc::now(), 60));
    }
}
