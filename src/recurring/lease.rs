//! # Generation Lease
//!
//! Cross-instance mutual exclusion for the recurring task processor. Multiple
//! replicas may run for availability; the lease (held in the shared store)
//! ensures only one performs generation per scan window. Leases expire on
//! their TTL so a crashed holder never wedges generation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::error::Result;

/// Leased-lock surface over the shared store
#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Try to take (or re-take) the lease. Returns `false` when another
    /// holder's unexpired lease exists.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Release the lease if this holder still owns it. Idempotent.
    async fn release(&self, key: &str, holder: &str) -> Result<()>;
}

struct LeaseRow {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// In-memory lease for tests and single-process deployments
#[derive(Default)]
pub struct InMemoryLeaseLock {
    leases: Mutex<HashMap<String, LeaseRow>>,
}

impl InMemoryLeaseLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseLock for InMemoryLeaseLock {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.lock();
        let now = Utc::now();
        match leases.get(key) {
            Some(row) if row.holder != holder && row.expires_at > now => Ok(false),
            _ => {
                leases.insert(
                    key.to_string(),
                    LeaseRow {
                        holder: holder.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, holder: &str) -> Result<()> {
        let mut leases = self.leases.lock();
        if leases.get(key).is_some_and(|row| row.holder == holder) {
            leases.remove(key);
        }
        Ok(())
    }
}

/// Schema for the Postgres-backed lease.
pub const GENERATION_LEASE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS generation_leases (
    lease_key  TEXT PRIMARY KEY,
    holder     TEXT NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
);
"#;

/// Postgres-backed lease: one row per key, stolen only after expiry
pub struct PgLeaseLock {
    pool: PgPool,
}

impl PgLeaseLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(GENERATION_LEASE_DDL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseLock for PgLeaseLock {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let expires_at = Utc::now() + ttl;
        let result = sqlx::query(
            "INSERT INTO generation_leases (lease_key, holder, expires_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (lease_key) DO UPDATE
             SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
             WHERE generation_leases.expires_at < NOW()
                OR generation_leases.holder = EXCLUDED.holder",
        )
        .bind(key)
        .bind(holder)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM generation_leases WHERE lease_key = $1 AND holder = $2")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
