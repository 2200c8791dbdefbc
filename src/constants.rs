//! # System Constants
//!
//! Topic names, consumer group names, and operational bounds shared across
//! pipeline components.

/// Event topics carried by the bus. The lifecycle producer is the sole writer
/// to the four `task.*` mutation topics; the reminder scheduler is the sole
/// writer to `task.reminder-triggered`.
pub mod topics {
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_UPDATED: &str = "task.updated";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_DELETED: &str = "task.deleted";
    pub const TASK_REMINDER_TRIGGERED: &str = "task.reminder-triggered";

    /// The four mutation topics emitted by the lifecycle producer.
    pub const LIFECYCLE: [&str; 4] = [TASK_CREATED, TASK_UPDATED, TASK_COMPLETED, TASK_DELETED];

    /// Every topic in the system, in a stable order.
    pub const ALL: [&str; 5] = [
        TASK_CREATED,
        TASK_UPDATED,
        TASK_COMPLETED,
        TASK_DELETED,
        TASK_REMINDER_TRIGGERED,
    ];
}

/// Consumer group names. Each group receives its own at-least-once delivery
/// stream; delivery within a group preserves per-task publish order.
pub mod groups {
    pub const REMINDER_SCHEDULER: &str = "reminder-scheduler";
    pub const NOTIFICATION_FANOUT: &str = "notification-fanout";
    pub const AUDIT_LOG: &str = "audit-log";
}

/// System-wide defaults, overridable through [`crate::config::PipelineConfig`].
pub mod defaults {
    /// Publish attempts before an event is dead-lettered.
    pub const PUBLISH_MAX_ATTEMPTS: u32 = 3;
    /// Base backoff between publish attempts, doubled per attempt.
    pub const PUBLISH_BACKOFF_MS: u64 = 50;
    /// Capacity of each consumer group's inbound channel.
    pub const GROUP_CHANNEL_CAPACITY: usize = 1024;
    /// Reminder trigger tick interval.
    pub const REMINDER_TICK_SECONDS: u64 = 10;
    /// Reminder queue snapshot interval.
    pub const SNAPSHOT_INTERVAL_SECONDS: u64 = 300;
    /// Recurring task scan interval.
    pub const RECURRING_SCAN_SECONDS: u64 = 300;
    /// Bounded recent-event-id cache size for idempotent consumers.
    pub const DEDUP_CACHE_SIZE: usize = 1024;
    /// Maximum concurrent notification streams per owner.
    pub const MAX_CONNECTIONS_PER_OWNER: usize = 3;
    /// Per-connection outbound queue depth before drop-oldest applies.
    pub const OUTBOX_CAPACITY: usize = 64;
    /// Notification messages per second before coalescing kicks in.
    pub const RATE_LIMIT_PER_SECOND: u32 = 10;
    /// Heartbeat cadence per connection.
    pub const HEARTBEAT_INTERVAL_SECONDS: u64 = 30;
    /// Connection silence tolerated before a forced close.
    pub const IDLE_TIMEOUT_SECONDS: u64 = 60;
    /// Recent events retained per owner for reconnect replay.
    pub const REPLAY_RING_SIZE: usize = 64;
    /// Audit buffer flush threshold (entries).
    pub const AUDIT_FLUSH_MAX_ENTRIES: usize = 100;
    /// Audit buffer flush threshold (elapsed time).
    pub const AUDIT_FLUSH_INTERVAL_MS: u64 = 1000;
}

/// Actor id recorded on events produced by background processes rather than a
/// user action (recurring materialization, reminder triggers).
pub const SYSTEM_ACTOR: uuid::Uuid = uuid::Uuid::nil();
