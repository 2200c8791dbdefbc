//! # Notification Fan-out
//!
//! Per-user live notification delivery: the connection registry, bounded
//! per-connection outboxes, and the consumer loop.

pub mod connection;
pub mod fanout;
pub mod registry;

pub use connection::{
    NotificationConnection, OutboundMessage, COALESCED_EVENT_NAME, HEARTBEAT_EVENT_NAME,
};
pub use fanout::{NotificationFanout, NotificationFanoutHandle};
pub use registry::{ConnectionRegistry, RegistryError, ReplayEntry};
