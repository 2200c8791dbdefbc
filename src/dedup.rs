//! # Recent-Event Deduplication Cache
//!
//! Bounded FIFO set of recently processed event ids. Every consumer checks it
//! before acting on an event so at-least-once redelivery collapses to exactly
//! one observable side effect. The bound keeps memory flat; an id evicted
//! after the window has, in practice, long since been redelivered or settled.

use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Bounded set of recently seen event ids
#[derive(Debug)]
pub struct DedupCache {
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record an event id. Returns `false` when the id was already present,
    /// meaning the caller should skip processing.
    pub fn insert(&mut self, event_id: Uuid) -> bool {
        if !self.seen.insert(event_id) {
            return false;
        }
        self.order.push_back(event_id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, event_id: &Uuid) -> bool {
        self.seen.contains(event_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
