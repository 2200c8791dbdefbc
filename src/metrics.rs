//! # Pipeline Metrics
//!
//! Monotone counters shared across components, plus the broker-availability
//! flag that drives the readiness signal. Counters are plain atomics so the
//! hot paths (consumer loops, per-connection writers) never take a lock.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared metrics handle. Clone-cheap; all clones observe the same counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    events_published: AtomicU64,
    events_consumed: AtomicU64,
    events_dead_lettered: AtomicU64,
    publish_failures: AtomicU64,
    duplicates_skipped: AtomicU64,
    reminders_triggered: AtomicU64,
    reminders_cancelled: AtomicU64,
    snapshot_failures: AtomicU64,
    instances_generated: AtomicU64,
    generation_conflicts: AtomicU64,
    notifications_delivered: AtomicU64,
    notifications_dropped: AtomicU64,
    notifications_coalesced: AtomicU64,
    connections_rejected: AtomicU64,
    audit_entries_written: AtomicU64,
    broker_unavailable: AtomicBool,
}

/// Point-in-time view of every counter, for the readiness endpoint and tests.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_consumed: u64,
    pub events_dead_lettered: u64,
    pub publish_failures: u64,
    pub duplicates_skipped: u64,
    pub reminders_triggered: u64,
    pub reminders_cancelled: u64,
    pub snapshot_failures: u64,
    pub instances_generated: u64,
    pub generation_conflicts: u64,
    pub notifications_delivered: u64,
    pub notifications_dropped: u64,
    pub notifications_coalesced: u64,
    pub connections_rejected: u64,
    pub audit_entries_written: u64,
    pub broker_available: bool,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_consumed(&self) {
        self.events_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dead_lettered(&self) {
        self.events_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_skipped(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reminder_triggered(&self) {
        self.reminders_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reminder_cancelled(&self) {
        self.reminders_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_failure(&self) {
        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_instance_generated(&self) {
        self.instances_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_conflict(&self) {
        self.generation_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_delivered(&self) {
        self.notifications_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_coalesced(&self) {
        self.notifications_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_entries_written(&self, count: u64) {
        self.audit_entries_written.fetch_add(count, Ordering::Relaxed);
    }

    /// Flag the broker as unavailable; readiness reports 503 until cleared.
    pub fn set_broker_available(&self, available: bool) {
        self.broker_unavailable.store(!available, Ordering::Release);
    }

    pub fn broker_available(&self) -> bool {
        !self.broker_unavailable.load(Ordering::Acquire)
    }

    pub fn notifications_dropped(&self) -> u64 {
        self.notifications_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_consumed: self.events_consumed.load(Ordering::Relaxed),
            events_dead_lettered: self.events_dead_lettered.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            reminders_triggered: self.reminders_triggered.load(Ordering::Relaxed),
            reminders_cancelled: self.reminders_cancelled.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
            instances_generated: self.instances_generated.load(Ordering::Relaxed),
            generation_conflicts: self.generation_conflicts.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            notifications_coalesced: self.notifications_coalesced.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            audit_entries_written: self.audit_entries_written.load(Ordering::Relaxed),
            broker_available: self.broker_available(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_event_published();
        metrics.record_event_published();
        metrics.record_notification_dropped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_published, 2);
        assert_eq!(snapshot.notifications_dropped, 1);
        assert_eq!(snapshot.events_consumed, 0);
    }

    #[test]
    fn test_broker_availability_flag() {
        let metrics = PipelineMetrics::new();
        assert!(metrics.broker_available());

        metrics.set_broker_available(false);
        assert!(!metrics.broker_available());
        assert!(!metrics.snapshot().broker_available);

        metrics.set_broker_available(true);
        assert!(metrics.broker_available());
    }
}
