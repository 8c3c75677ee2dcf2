//! In-process implementations of the consumer's stores
//!
//! Same contracts as the SQLite versions, scoped to one process: useful for
//! single-instance runs and for tests. Locks here exclude only callers that
//! share the same `InMemoryLockService`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::error::StoreError;
use super::lock::{new_holder_id, new_owner_token, ttl_millis, LockLease, LockService};
use super::rate_limit::RequestTimeStore;
use super::storage::EventStorage;
use super::types::Event;

fn guard<'a, T>(
    mutex: &'a Mutex<T>,
    what: &'static str,
) -> Result<MutexGuard<'a, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Poisoned(what))
}

#[derive(Default)]
struct StorageState {
    events: HashMap<(String, i64), Event>,
    cursors: HashMap<String, i64>,
}

/// Event storage kept in a HashMap, keyed by (source, id)
#[derive(Default)]
pub struct InMemoryEventStorage {
    state: Mutex<StorageState>,
}

impl InMemoryEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored events for a source, ordered by id
    pub fn events_for(&self, source_name: &str) -> Result<Vec<Event>, StoreError> {
        let state = guard(&self.state, "event storage")?;
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|e| e.source_name() == source_name)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id());
        Ok(events)
    }
}

#[async_trait]
impl EventStorage for InMemoryEventStorage {
    async fn store_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut state = guard(&self.state, "event storage")?;
        state
            .events
            .insert((event.source_name().to_string(), event.id()), event.clone());
        Ok(())
    }

    async fn get_cursor(&self, source_name: &str) -> Result<i64, StoreError> {
        let state = guard(&self.state, "event storage")?;
        Ok(state.cursors.get(source_name).copied().unwrap_or(0))
    }

    async fn save_cursor(&self, source_name: &str, last_event_id: i64) -> Result<(), StoreError> {
        let mut state = guard(&self.state, "event storage")?;
        let cursor = state.cursors.entry(source_name.to_string()).or_insert(0);
        *cursor = (*cursor).max(last_event_id);
        Ok(())
    }
}

/// Last-attempt timestamps kept in a HashMap
#[derive(Default)]
pub struct InMemoryRequestTimeStore {
    times: Mutex<HashMap<String, i64>>,
}

impl InMemoryRequestTimeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestTimeStore for InMemoryRequestTimeStore {
    async fn get_last_request_time(&self, source_name: &str) -> Result<i64, StoreError> {
        let times = guard(&self.times, "request times")?;
        Ok(times.get(source_name).copied().unwrap_or(0))
    }

    async fn update_last_request_time(
        &self,
        source_name: &str,
        timestamp_ms: i64,
    ) -> Result<(), StoreError> {
        let mut times = guard(&self.times, "request times")?;
        times.insert(source_name.to_string(), timestamp_ms);
        Ok(())
    }
}

struct Claim {
    owner_token: String,
    expires_at_ms: i64,
}

/// TTL locks kept in a HashMap; expired claims are replaced on the next acquire
pub struct InMemoryLockService {
    claims: Mutex<HashMap<String, Claim>>,
    holder_id: String,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            holder_id: new_holder_id(),
            clock,
        }
    }

    /// Whether a live (unexpired) claim exists for `key`
    pub fn is_held(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let claims = guard(&self.claims, "lock claims")?;
        Ok(claims.get(key).is_some_and(|c| c.expires_at_ms > now))
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, StoreError> {
        let now = self.clock.now_millis();
        let mut claims = guard(&self.claims, "lock claims")?;

        if claims.get(key).is_some_and(|c| c.expires_at_ms > now) {
            return Ok(None);
        }

        let owner_token = new_owner_token(&self.holder_id);
        claims.insert(
            key.to_string(),
            Claim {
                owner_token: owner_token.clone(),
                expires_at_ms: now.saturating_add(ttl_millis(ttl)),
            },
        );

        Ok(Some(LockLease {
            key: key.to_string(),
            owner_token,
            ttl,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<bool, StoreError> {
        let mut claims = guard(&self.claims, "lock claims")?;
        let owned = claims
            .get(&lease.key)
            .is_some_and(|c| c.owner_token == lease.owner_token);
        if owned {
            claims.remove(&lease.key);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::clock::ManualClock;
    use serde_json::Map;

    #[tokio::test]
    async fn test_memory_storage_cursor_and_upsert() {
        let storage = InMemoryEventStorage::new();
        assert_eq!(storage.get_cursor("A").await.unwrap(), 0);

        storage.store_event(&Event::new(2, "A", Map::new())).await.unwrap();
        storage.store_event(&Event::new(1, "A", Map::new())).await.unwrap();
        storage.store_event(&Event::new(2, "A", Map::new())).await.unwrap();

        let ids: Vec<i64> = storage.events_for("A").unwrap().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![1, 2]);

        storage.save_cursor("A", 2).await.unwrap();
        storage.save_cursor("A", 1).await.unwrap();
        assert_eq!(storage.get_cursor("A").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_request_times_default_to_zero() {
        let store = InMemoryRequestTimeStore::new();
        assert_eq!(store.get_last_request_time("A").await.unwrap(), 0);
        store.update_last_request_time("A", 42).await.unwrap();
        assert_eq!(store.get_last_request_time("A").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_memory_lock_ttl_and_owner_token() {
        let clock = Arc::new(ManualClock::new(0));
        let locks = InMemoryLockService::with_clock(clock.clone());

        let first = locks.acquire("A:0", Duration::from_secs(2)).await.unwrap().unwrap();
        assert!(locks.acquire("A:0", Duration::from_secs(2)).await.unwrap().is_none());
        assert!(locks.is_held("A:0").unwrap());

        clock.advance(2_000);
        assert!(!locks.is_held("A:0").unwrap());
        let second = locks.acquire("A:0", Duration::from_secs(2)).await.unwrap().unwrap();

        // Expired holder's release must not remove the new claim
        assert!(!locks.release(&first).await.unwrap());
        assert!(locks.is_held("A:0").unwrap());
        assert!(locks.release(&second).await.unwrap());
        assert!(!locks.is_held("A:0").unwrap());
    }
}
