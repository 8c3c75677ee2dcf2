//! Distributed, TTL-bounded locks keyed by string
//!
//! A claim is created atomically if absent (or if the previous claim has
//! expired) and carries an owner token. Release is compare-and-delete on that
//! token, so a holder whose claim expired and was taken over by another
//! process can never delete the new holder's claim.
//!
//! Expiry is the only recovery path for a crashed holder: its claim stays in
//! place until `ttl` elapses.

use async_trait::async_trait;
use rand::Rng;
use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::db::{lock_conn, SharedConnection};
use super::error::StoreError;

/// Default lock TTL (30 seconds)
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// A held claim; hand it back to `release`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub owner_token: String,
    pub ttl: Duration,
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// Claim `key` for `ttl`
    ///
    /// Returns `Ok(None)` when a live claim already exists.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, StoreError>;

    /// Drop the claim if it is still owned by `lease`
    ///
    /// Returns whether a claim was actually removed.
    async fn release(&self, lease: &LockLease) -> Result<bool, StoreError>;
}

/// Random per-process prefix for owner tokens
pub fn new_holder_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{}-{:016x}", std::process::id(), rng.gen::<u64>())
}

/// Unique token for a single acquisition by `holder_id`
pub fn new_owner_token(holder_id: &str) -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("{}:{:016x}", holder_id, nonce)
}

pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// SQLite-backed lock service
///
/// Every process that opens the same database file competes for the same
/// rows in `consumer_locks`.
pub struct SqliteLockService {
    conn: SharedConnection,
    holder_id: String,
    clock: Arc<dyn Clock>,
}

impl SqliteLockService {
    pub fn new(conn: SharedConnection) -> Self {
        Self::with_clock(conn, Arc::new(SystemClock))
    }

    pub fn with_clock(conn: SharedConnection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            holder_id: new_holder_id(),
            clock,
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Delete claims that expired before now; returns how many were removed
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_millis();
        let conn = lock_conn(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM consumer_locks WHERE expires_at_ms <= ?1",
            params![now],
        )?;
        Ok(removed)
    }
}

#[async_trait]
impl LockService for SqliteLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, StoreError> {
        let now = self.clock.now_millis();
        let expires_at = now.saturating_add(ttl_millis(ttl));
        let owner_token = new_owner_token(&self.holder_id);

        let conn = lock_conn(&self.conn)?;
        // Single statement: insert if absent, or take over only if expired
        let changed = conn.execute(
            r#"
            INSERT INTO consumer_locks (lock_key, owner_token, acquired_at_ms, expires_at_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(lock_key) DO UPDATE SET
                owner_token = excluded.owner_token,
                acquired_at_ms = excluded.acquired_at_ms,
                expires_at_ms = excluded.expires_at_ms
            WHERE consumer_locks.expires_at_ms <= ?3
            "#,
            params![key, owner_token, now, expires_at],
        )?;

        if changed == 0 {
            return Ok(None);
        }

        Ok(Some(LockLease {
            key: key.to_string(),
            owner_token,
            ttl,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<bool, StoreError> {
        let conn = lock_conn(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM consumer_locks WHERE lock_key = ?1 AND owner_token = ?2",
            params![lease.key, lease.owner_token],
        )?;
        Ok(removed > 0)
    }
}
