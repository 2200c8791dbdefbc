//! # Pipeline Error Types
//!
//! Crate-wide error enum for the lifecycle pipeline, using thiserror for
//! structured error types instead of `Box<dyn Error>` patterns. Subsystems
//! define their own narrow error enums (`PublishError`, `StoreError`,
//! `RegistryError`) and convert into `PipelineError` at component boundaries.

use thiserror::Error;

/// Top-level error type for pipeline components
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Event bus error: {message}")]
    EventBus { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Snapshot persistence error: {message}")]
    SnapshotPersist { message: String },

    #[error("Scheduler error: {message}")]
    Scheduler { message: String },

    #[error("Notification error: {message}")]
    Notification { message: String },

    #[error("Audit log error: {message}")]
    AuditLog { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl PipelineError {
    /// Create an event bus error
    pub fn event_bus(message: impl Into<String>) -> Self {
        Self::EventBus {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a snapshot persistence error
    pub fn snapshot_persist(message: impl Into<String>) -> Self {
        Self::SnapshotPersist {
            message: message.into(),
        }
    }

    /// Create a scheduler error
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }

    /// Create a notification error
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }

    /// Create an audit log error
    pub fn audit_log(message: impl Into<String>) -> Self {
        Self::AuditLog {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PipelineError::store("no rows found"),
            sqlx::Error::PoolTimedOut => PipelineError::store("database pool timed out"),
            sqlx::Error::PoolClosed => PipelineError::store("database pool is closed"),
            other => PipelineError::store(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::validation(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let bus_err = PipelineError::event_bus("broker unavailable");
        assert!(matches!(bus_err, PipelineError::EventBus { .. }));

        let validation_err = PipelineError::validation("recurrence pattern requires a due date");
        assert!(matches!(validation_err, PipelineError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::snapshot_persist("write timed out");
        let display = format!("{err}");
        assert!(display.contains("Snapshot persistence error"));
        assert!(display.contains("write timed out"));
    }

    #[test]
    fn test_sqlx_conversion() {
        let err: PipelineError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, PipelineError::Store { .. }));
    }
}
