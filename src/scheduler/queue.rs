//! # Reminder Queue
//!
//! Min-heap of pending reminders keyed by trigger instant, with a per-task
//! index: a task has at most one active reminder, so inserting for a task that
//! already has a pending entry replaces it. Replaced and cancelled entries are
//! invalidated lazily: the heap skips stale keys on pop instead of paying for
//! arbitrary removal.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use uuid::Uuid;

use crate::models::reminder::ReminderScheduleEntry;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    trigger_at: DateTime<Utc>,
    task_id: Uuid,
    reminder_id: Uuid,
}

/// Priority queue of pending reminders, one per task
#[derive(Debug, Default)]
pub struct ReminderQueue {
    heap: BinaryHeap<Reverse<HeapKey>>,
    pending: HashMap<Uuid, ReminderScheduleEntry>,
}

impl ReminderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending entry, replacing any prior pending entry for the same
    /// task. Returns the replaced entry when one existed.
    pub fn insert(&mut self, entry: ReminderScheduleEntry) -> Option<ReminderScheduleEntry> {
        let replaced = self.pending.insert(entry.task_id, entry.clone());
        self.heap.push(Reverse(HeapKey {
            trigger_at: entry.trigger_at,
            task_id: entry.task_id,
            reminder_id: entry.reminder_id,
        }));
        replaced
    }

    /// Remove the pending entry for a task, if any. Idempotent.
    pub fn cancel(&mut self, task_id: Uuid) -> Option<ReminderScheduleEntry> {
        self.pending.remove(&task_id)
    }

    /// Pop every entry due at or before `now`, earliest first. Stale heap keys
    /// (superseded or cancelled entries) are discarded along the way.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<ReminderScheduleEntry> {
        let mut due = Vec::new();
        while let Some(Reverse(key)) = self.heap.peek() {
            if key.trigger_at > now {
                break;
            }
            let key = match self.heap.pop() {
                Some(Reverse(key)) => key,
                None => break,
            };
            let is_live = self
                .pending
                .get(&key.task_id)
                .map(|entry| entry.reminder_id == key.reminder_id)
                .unwrap_or(false);
            if is_live {
                if let Some(entry) = self.pending.remove(&key.task_id) {
                    due.push(entry);
                }
            }
        }
        due
    }

    /// The trigger instant of the earliest live entry.
    pub fn next_trigger_at(&self) -> Option<DateTime<Utc>> {
        self.pending.values().map(|e| e.trigger_at).min()
    }

    /// All pending entries, for snapshotting. Order is unspecified.
    pub fn pending_entries(&self) -> Vec<ReminderScheduleEntry> {
        self.pending.values().cloned().collect()
    }

    pub fn pending_for_task(&self, task_id: Uuid) -> Option<&ReminderScheduleEntry> {
        self.pending.get(&task_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
