//! # Audit Logging
//!
//! Batched, idempotent persistence of every lifecycle event to an append-only,
//! time-partitioned log, plus the read-only per-task history query.

pub mod store;
pub mod writer;

pub use store::{AuditEntry, AuditStore, InMemoryAuditStore, PgAuditStore, AUDIT_LOG_DDL};
pub use writer::{AuditLogWriter, AuditWriterHandle};
