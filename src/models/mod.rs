//! # Data Model
//!
//! Entities and value objects for the lifecycle pipeline: the task shape this
//! subsystem observes, the recurrence pattern value object, and the durable
//! reminder schedule entry.

pub mod recurrence;
pub mod reminder;
pub mod task;

pub use recurrence::RecurrencePattern;
pub use reminder::{ReminderScheduleEntry, ReminderEntryStatus};
pub use task::{NewTask, ReminderStatus, Task, TaskPatch, TaskSnapshot, TaskStatus};
