#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SSE in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # TaskPulse Core
//!
//! Event-driven task-lifecycle pipeline: task mutations become durable,
//! ordered, idempotently-consumed events that drive due-date reminders,
//! real-time client notification, and immutable audit logging, plus the
//! background materialization of recurring task instances.
//!
//! ## Architecture
//!
//! The [`producer::TaskLifecycleProducer`] is the only component that emits
//! the four `task.*` mutation events; the [`scheduler`] is the only emitter of
//! `task.reminder-triggered`. Three consumer groups hang off the
//! [`events::EventBus`] with at-least-once delivery and per-task ordering:
//!
//! - [`scheduler`] maintains a min-heap trigger queue behind one owner task,
//!   snapshotted periodically for crash recovery;
//! - [`notify`] fans events out to per-user live streams with bounded
//!   outboxes, rate limiting, and heartbeats;
//! - [`audit`] batches everything into an append-only, time-partitioned log.
//!
//! The [`recurring`] processor closes the loop: it scans recurring parents
//! under a leased lock and materializes due instances through the producer's
//! API, never the bus.
//!
//! ## Delivery model
//!
//! At-least-once plus idempotent consumers. Every consumer deduplicates on
//! the event id; duplicate delivery collapses to exactly one observable side
//! effect. Task mutations never fail because an event could not be published.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskpulse_core::config::PipelineConfig;
//! use taskpulse_core::events::InMemoryEventBus;
//! use taskpulse_core::metrics::PipelineMetrics;
//! use taskpulse_core::producer::TaskLifecycleProducer;
//! use taskpulse_core::store::{InMemoryTaskStore, TaskStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load()?;
//! let metrics = PipelineMetrics::new();
//! let bus = Arc::new(InMemoryEventBus::new(config.bus.clone(), Arc::clone(&metrics)));
//! let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
//! let producer = TaskLifecycleProducer::new(store, bus, metrics);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod constants;
pub mod dedup;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod producer;
pub mod recurring;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod web;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use events::{EventBus, InMemoryEventBus, TaskEvent, TaskEventPayload};
pub use metrics::PipelineMetrics;
pub use producer::TaskLifecycleProducer;
pub use shutdown::Shutdown;
