//! # Event System
//!
//! Lifecycle event types, the bus abstraction, and the in-memory broker.

pub mod bus;
pub mod memory;
pub mod types;

pub use bus::{Ack, DeadLetteredEvent, EventBus, PublishError, Subscription};
pub use memory::InMemoryEventBus;
pub use types::{diff_tasks, FieldChange, TaskEvent, TaskEventPayload, REMINDER_TYPE_DUE_DATE};
