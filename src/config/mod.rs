//! # Pipeline Configuration
//!
//! Explicit, validated configuration for every pipeline component. Values load
//! from an optional TOML file plus `TASKPULSE_`-prefixed environment overrides;
//! there are no silent fallbacks beyond the documented defaults.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use taskpulse_core::config::PipelineConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load()?;
//! let tick = config.reminders.tick_interval_seconds;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;
use crate::error::{PipelineError, Result};

/// Root configuration for the lifecycle pipeline
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Event bus retry, backoff, and channel sizing
    pub bus: BusConfig,

    /// Reminder scheduler cadence and durability
    pub reminders: ReminderConfig,

    /// Recurring task processor cadence and lease
    pub recurring: RecurringConfig,

    /// Notification fan-out limits
    pub notifications: NotifyConfig,

    /// Audit log batching
    pub audit: AuditConfig,

    /// Durable storage connection (snapshots + audit log)
    pub database: DatabaseConfig,

    /// HTTP surface
    pub web: WebConfig,
}

/// Event bus retry and channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Attempts before an event is dead-lettered
    pub publish_max_attempts: u32,
    /// Base backoff in milliseconds, doubled per attempt
    pub publish_backoff_ms: u64,
    /// Capacity of each consumer group's inbound channel
    pub group_channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            publish_max_attempts: defaults::PUBLISH_MAX_ATTEMPTS,
            publish_backoff_ms: defaults::PUBLISH_BACKOFF_MS,
            group_channel_capacity: defaults::GROUP_CHANNEL_CAPACITY,
        }
    }
}

impl BusConfig {
    /// Backoff before the given zero-based retry attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.publish_backoff_ms.saturating_mul(1 << attempt.min(16)))
    }
}

/// Reminder scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// Seconds between trigger ticks
    pub tick_interval_seconds: u64,
    /// Seconds between durable queue snapshots
    pub snapshot_interval_seconds: u64,
    /// Bounded recent-event-id cache size
    pub dedup_cache_size: usize,
    /// Command channel depth between event handlers and the queue owner
    pub command_channel_capacity: usize,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: defaults::REMINDER_TICK_SECONDS,
            snapshot_interval_seconds: defaults::SNAPSHOT_INTERVAL_SECONDS,
            dedup_cache_size: defaults::DEDUP_CACHE_SIZE,
            command_channel_capacity: 256,
        }
    }
}

/// Recurring task processor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecurringConfig {
    /// Seconds between generation scans
    pub scan_interval_seconds: u64,
    /// Identifier for the cross-instance generation lease
    pub lease_key: String,
    /// Seconds a held lease remains valid without renewal
    pub lease_ttl_seconds: u64,
}

impl Default for RecurringConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: defaults::RECURRING_SCAN_SECONDS,
            lease_key: "taskpulse.recurring-generation".to_string(),
            lease_ttl_seconds: 120,
        }
    }
}

/// Notification fan-out configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Maximum concurrent streams per owner
    pub max_connections_per_owner: usize,
    /// Per-connection outbound queue depth
    pub outbox_capacity: usize,
    /// Messages per second per connection before coalescing
    pub rate_limit_per_second: u32,
    /// Seconds between heartbeat messages
    pub heartbeat_interval_seconds: u64,
    /// Seconds of silence before a connection is force-closed
    pub idle_timeout_seconds: u64,
    /// Recent events retained per owner for reconnect replay
    pub replay_ring_size: usize,
    /// Bounded recent-event-id cache size
    pub dedup_cache_size: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_connections_per_owner: defaults::MAX_CONNECTIONS_PER_OWNER,
            outbox_capacity: defaults::OUTBOX_CAPACITY,
            rate_limit_per_second: defaults::RATE_LIMIT_PER_SECOND,
            heartbeat_interval_seconds: defaults::HEARTBEAT_INTERVAL_SECONDS,
            idle_timeout_seconds: defaults::IDLE_TIMEOUT_SECONDS,
            replay_ring_size: defaults::REPLAY_RING_SIZE,
            dedup_cache_size: defaults::DEDUP_CACHE_SIZE,
        }
    }
}

/// Audit log writer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Flush when this many entries are buffered
    pub flush_max_entries: usize,
    /// Flush after this many milliseconds regardless of entry count
    pub flush_interval_ms: u64,
    /// Bounded recent-event-id cache size
    pub dedup_cache_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            flush_max_entries: defaults::AUDIT_FLUSH_MAX_ENTRIES,
            flush_interval_ms: defaults::AUDIT_FLUSH_INTERVAL_MS,
            dedup_cache_size: defaults::DEDUP_CACHE_SIZE,
        }
    }
}

/// Durable storage configuration. When `url` is empty the process runs with
/// in-memory stores, which is the test and demo posture.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            connect_timeout_seconds: 10,
        }
    }
}

/// HTTP surface configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8920".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `taskpulse.toml` (if present) and
    /// `TASKPULSE_`-prefixed environment variables, then validate.
    pub fn load() -> Result<Self> {
        Self::load_from(Some("taskpulse"))
    }

    /// Load with an explicit file stem, or defaults only when `None`.
    pub fn load_from(file_stem: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(stem) = file_stem {
            builder = builder.add_source(config::File::with_name(stem).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("TASKPULSE").separator("__"))
            .build()
            .map_err(|e| PipelineError::configuration(e.to_string()))?;

        let config: PipelineConfig = settings
            .try_deserialize()
            .map_err(|e| PipelineError::configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would stall or unbound the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.bus.publish_max_attempts == 0 {
            return Err(PipelineError::configuration(
                "bus.publish_max_attempts must be at least 1",
            ));
        }
        if self.bus.group_channel_capacity == 0 {
            return Err(PipelineError::configuration(
                "bus.group_channel_capacity must be nonzero",
            ));
        }
        if self.reminders.tick_interval_seconds == 0 {
            return Err(PipelineError::configuration(
                "reminders.tick_interval_seconds must be nonzero",
            ));
        }
        if self.reminders.snapshot_interval_seconds == 0 {
            return Err(PipelineError::configuration(
                "reminders.snapshot_interval_seconds must be nonzero",
            ));
        }
        if self.recurring.scan_interval_seconds == 0 {
            return Err(PipelineError::configuration(
                "recurring.scan_interval_seconds must be nonzero",
            ));
        }
        if self.notifications.max_connections_per_owner == 0 {
            return Err(PipelineError::configuration(
                "notifications.max_connections_per_owner must be nonzero",
            ));
        }
        if self.notifications.outbox_capacity == 0 {
            return Err(PipelineError::configuration(
                "notifications.outbox_capacity must be nonzero",
            ));
        }
        if self.notifications.idle_timeout_seconds <= self.notifications.heartbeat_interval_seconds
        {
            return Err(PipelineError::configuration(
                "notifications.idle_timeout_seconds must exceed the heartbeat interval",
            ));
        }
        if self.audit.flush_max_entries == 0 {
            return Err(PipelineError::configuration(
                "audit.flush_max_entries must be nonzero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reminders.tick_interval_seconds, 10);
        assert_eq!(config.reminders.snapshot_interval_seconds, 300);
        assert_eq!(config.notifications.max_connections_per_owner, 3);
        assert_eq!(config.audit.flush_max_entries, 100);
    }

    #[test]
    fn test_validation_rejects_zero_tick() {
        let mut config = PipelineConfig::default();
        config.reminders.tick_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_idle_below_heartbeat() {
        let mut config = PipelineConfig::default();
        config.notifications.idle_timeout_seconds = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let bus = BusConfig::default();
        assert_eq!(bus.backoff_for_attempt(0), Duration::from_millis(50));
        assert_eq!(bus.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(bus.backoff_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn test_load_defaults_without_file() {
        let config = PipelineConfig::load_from(None).expect("defaults should load");
        assert_eq!(config.bus.publish_max_attempts, 3);
    }
}
