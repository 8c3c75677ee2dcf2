//! # Event Consumer
//!
//! Polling orchestrator for append-only remote event feeds.
//!
//! Each round walks the registered sources in registration order and, per source:
//! 1. Skips it if the last attempt was less than `min_request_interval` ago
//! 2. Reads the stored cursor and claims the lock `"{source}:{cursor}"`
//! 3. Records the attempt time, then fetches everything after the cursor
//! 4. Stores events with `id > cursor` and advances the cursor to the max id
//! 5. Releases the lock on every exit path
//!
//! A failure in one source never stops the round for the others.
//!
//! ## Horizontal scale-out
//!
//! Run as many `consume_events` processes as needed against the same
//! database. Processes on one host can share the SQLite lock table; across
//! hosts, set `REDIS_URL` so locks and request times live in Redis. The lock key binds a (source, cursor) pair, so two processes can
//! never fetch-and-store the same batch at once, while different sources (or
//! a source whose cursor has moved on) proceed independently. A crashed
//! holder's claim expires after the lock TTL.
//!
//! ## Module Organization
//!
//! - `types` - Event, source descriptors, batch/round reports
//! - `error` - Error enums for sources, stores, config and the consumer
//! - `clock` - Wall-clock abstraction (milliseconds)
//! - `source` - `EventSource` trait and the HTTP implementation
//! - `registry` - Builds HTTP sources from configuration
//! - `storage` - `EventStorage` trait (events + cursors)
//! - `lock` - `LockService` trait (TTL-bounded, owner-token claims)
//! - `rate_limit` - `RequestTimeStore` trait (last attempt per source)
//! - `db` - SQLite schema migrations and connection pragmas
//! - `memory` - In-process implementations of the three stores
//! - `redis_store` - Redis lock and request-time stores for multi-host runs
//! - `orchestrator` - `EventConsumer`, the polling loop
//! - `config` - Environment configuration for the binary

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod memory;
pub mod orchestrator;
pub mod rate_limit;
pub mod redis_store;
pub mod registry;
pub mod source;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ConsumerConfig;
pub use error::{ConfigError, ConsumerError, SourceError, StoreError};
pub use lock::{LockLease, LockService, SqliteLockService};
pub use memory::{InMemoryEventStorage, InMemoryLockService, InMemoryRequestTimeStore};
pub use orchestrator::{ConsumerSettings, EventConsumer};
pub use rate_limit::{RequestTimeStore, SqliteRequestTimeStore};
pub use redis_store::{RedisLockService, RedisRequestTimeStore};
pub use registry::SourceRegistry;
pub use source::{EventSource, HttpEventSource, HttpSourceOptions};
pub use storage::{EventStorage, SqliteEventStorage};
pub use types::{BatchSummary, Event, RoundReport, SourceDescriptor, SourceOutcome};
