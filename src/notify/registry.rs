//! # Connection Registry
//!
//! In-memory mapping of owner id to live notification connections, with a
//! hard per-owner cap, plus the bounded per-owner replay ring that backs
//! best-effort reconnect catch-up. The registry starts empty on every boot;
//! connections never survive a restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::NotifyConfig;
use crate::metrics::PipelineMetrics;
use crate::notify::connection::NotificationConnection;

/// Connection admission failures
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("owner {owner_id} already has {limit} open notification streams")]
    CapacityExceeded { owner_id: Uuid, limit: usize },
}

/// One event retained for reconnect replay
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub event_name: &'static str,
    pub event_id: Uuid,
    pub data: serde_json::Value,
}

/// Registry of live connections and replay rings, keyed by owner
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Vec<Arc<NotificationConnection>>>,
    replay: DashMap<Uuid, VecDeque<ReplayEntry>>,
    config: NotifyConfig,
    metrics: Arc<PipelineMetrics>,
}

impl ConnectionRegistry {
    pub fn new(config: NotifyConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            connections: DashMap::new(),
            replay: DashMap::new(),
            config,
            metrics,
        }
    }

    /// Admit a new connection for `owner_id`, enforcing the per-owner cap.
    pub fn register(
        &self,
        owner_id: Uuid,
        client_addr: Option<String>,
    ) -> Result<Arc<NotificationConnection>, RegistryError> {
        let mut entry = self.connections.entry(owner_id).or_default();
        if entry.len() >= self.config.max_connections_per_owner {
            self.metrics.record_connection_rejected();
            return Err(RegistryError::CapacityExceeded {
                owner_id,
                limit: self.config.max_connections_per_owner,
            });
        }
        let connection = NotificationConnection::new(owner_id, client_addr, &self.config);
        entry.push(Arc::clone(&connection));
        info!(
            owner_id = %owner_id,
            connection_id = %connection.connection_id,
            open = entry.len(),
            "notification stream registered"
        );
        Ok(connection)
    }

    /// Remove and close one connection. Idempotent.
    pub fn deregister(&self, owner_id: Uuid, connection_id: Uuid) {
        if let Some(mut entry) = self.connections.get_mut(&owner_id) {
            if let Some(position) = entry
                .iter()
                .position(|c| c.connection_id == connection_id)
            {
                let connection = entry.remove(position);
                connection.close();
                debug!(
                    owner_id = %owner_id,
                    connection_id = %connection_id,
                    "notification stream deregistered"
                );
            }
            if entry.is_empty() {
                drop(entry);
                self.connections.remove_if(&owner_id, |_, v| v.is_empty());
            }
        }
    }

    /// Live connections for one owner.
    pub fn connections_for(&self, owner_id: Uuid) -> Vec<Arc<NotificationConnection>> {
        self.connections
            .get(&owner_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Every live connection, across owners.
    pub fn all_connections(&self) -> Vec<Arc<NotificationConnection>> {
        self.connections
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }

    /// Close and remove connections silent past the idle timeout. Returns the
    /// number pruned.
    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let mut pruned = 0;
        for mut entry in self.connections.iter_mut() {
            entry.value_mut().retain(|connection| {
                if connection.is_idle(now, self.config.idle_timeout_seconds) {
                    connection.close();
                    pruned += 1;
                    info!(
                        owner_id = %connection.owner_id,
                        connection_id = %connection.connection_id,
                        "idle notification stream closed"
                    );
                    false
                } else {
                    true
                }
            });
        }
        pruned
    }

    /// Append an event to the owner's replay ring.
    pub fn record_replay(&self, owner_id: Uuid, entry: ReplayEntry) {
        let mut ring = self.replay.entry(owner_id).or_default();
        ring.push_back(entry);
        while ring.len() > self.config.replay_ring_size {
            ring.pop_front();
        }
    }

    /// Events after `last_event_id` in the owner's ring, oldest first. An
    /// unknown id yields nothing; replay is best-effort, never guaranteed.
    pub fn replay_after(&self, owner_id: Uuid, last_event_id: Uuid) -> Vec<ReplayEntry> {
        let Some(ring) = self.replay.get(&owner_id) else {
            return Vec::new();
        };
        match ring.iter().position(|e| e.event_id == last_event_id) {
            Some(position) => ring.iter().skip(position + 1).cloned().collect(),
            None => Vec::new(),
        }
    }
}
