//! Redis-backed lock and request-time stores
//!
//! For consumers spread over several hosts. Every process pointed at the
//! same Redis server competes for the same keys:
//!
//! - `event_consumer_lock:{source}:{cursor}` holds the owner token and
//!   expires on its own after the lock TTL (`SET NX PX`)
//! - `last_request_time:{source}` holds the last attempt in epoch millis
//!
//! Release runs a Lua script so the token check and the delete happen as one
//! step on the server.

use async_trait::async_trait;
use log::debug;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use std::time::Duration;

use super::error::StoreError;
use super::lock::{new_holder_id, new_owner_token, ttl_millis, LockLease, LockService};
use super::rate_limit::RequestTimeStore;

pub const LOCK_PREFIX: &str = "event_consumer_lock:";
pub const REQUEST_TIME_PREFIX: &str = "last_request_time:";

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Open a reconnecting connection to `url` (e.g. `redis://127.0.0.1:6379`)
pub async fn connect(url: &str) -> Result<ConnectionManager, StoreError> {
    let client = Client::open(url)?;
    let conn = client.get_connection_manager().await?;
    debug!("Connected to Redis at {}", url);
    Ok(conn)
}

pub fn lock_redis_key(key: &str) -> String {
    format!("{}{}", LOCK_PREFIX, key)
}

pub fn request_time_redis_key(source_name: &str) -> String {
    format!("{}{}", REQUEST_TIME_PREFIX, source_name)
}

/// Redis milliseconds for `SET .. PX`; zero is rejected by the server
fn px_millis(ttl: Duration) -> i64 {
    ttl_millis(ttl).max(1)
}

/// Lock service shared by every process connected to one Redis server
///
/// Expiry is enforced by Redis itself, so no clock is involved here.
pub struct RedisLockService {
    conn: ConnectionManager,
    holder_id: String,
    release_script: Script,
}

impl RedisLockService {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            holder_id: new_holder_id(),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, StoreError> {
        let owner_token = new_owner_token(&self.holder_id);
        let mut conn = self.conn.clone();

        // Nil reply means the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_redis_key(key))
            .arg(&owner_token)
            .arg("NX")
            .arg("PX")
            .arg(px_millis(ttl))
            .query_async(&mut conn)
            .await?;

        if reply.is_none() {
            return Ok(None);
        }

        Ok(Some(LockLease {
            key: key.to_string(),
            owner_token,
            ttl,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release_script
            .key(lock_redis_key(&lease.key))
            .arg(&lease.owner_token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}

/// Request times shared by every process connected to one Redis server
pub struct RedisRequestTimeStore {
    conn: ConnectionManager,
}

impl RedisRequestTimeStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RequestTimeStore for RedisRequestTimeStore {
    async fn get_last_request_time(&self, source_name: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(request_time_redis_key(source_name)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn update_last_request_time(
        &self,
        source_name: &str,
        timestamp_ms: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(request_time_redis_key(source_name), timestamp_ms).await?;
        Ok(())
    }
}
