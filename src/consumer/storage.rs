//! Durable event storage and per-source cursors
//!
//! Tables written (see `/sql/` directory):
//! - `events` - UPSERT on (source_name, event_id)
//! - `source_cursors` - UPSERT on source_name, never moves backwards

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::db::{lock_conn, SharedConnection};
use super::error::StoreError;
use super::types::Event;

/// Event persistence plus the watermark for each source
///
/// Each call is independently durable once it returns `Ok`. The consumer
/// stores events one by one and only then saves the cursor, so a crash in
/// between re-delivers the same ids on the next run.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Persist one event
    ///
    /// Must tolerate being called again for an id that is already stored
    /// (upsert), since a batch is re-fetched whenever the cursor was not saved.
    async fn store_event(&self, event: &Event) -> Result<(), StoreError>;

    /// Highest id known to be stored for the source, 0 if never seen
    async fn get_cursor(&self, source_name: &str) -> Result<i64, StoreError>;

    /// Advance the cursor; a value lower than the stored one is ignored
    async fn save_cursor(&self, source_name: &str, last_event_id: i64) -> Result<(), StoreError>;
}

/// SQLite implementation of EventStorage
pub struct SqliteEventStorage {
    conn: SharedConnection,
}

impl SqliteEventStorage {
    /// Use a connection whose schema has already been migrated
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// Number of stored events for a source
    pub fn event_count(&self, source_name: &str) -> Result<i64, StoreError> {
        let conn = lock_conn(&self.conn)?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE source_name = ?1",
            params![source_name],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[async_trait]
impl EventStorage for SqliteEventStorage {
    async fn store_event(&self, event: &Event) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event.payload())?;
        let now = chrono::Utc::now().timestamp();

        let conn = lock_conn(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO events (source_name, event_id, payload, stored_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(source_name, event_id) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at
            "#,
            params![event.source_name(), event.id(), payload, now],
        )?;

        Ok(())
    }

    async fn get_cursor(&self, source_name: &str) -> Result<i64, StoreError> {
        let conn = lock_conn(&self.conn)?;
        let cursor: Option<i64> = conn
            .query_row(
                "SELECT last_event_id FROM source_cursors WHERE source_name = ?1",
                params![source_name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(cursor.unwrap_or(0))
    }

    async fn save_cursor(&self, source_name: &str, last_event_id: i64) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();

        let conn = lock_conn(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO source_cursors (source_name, last_event_id, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(source_name) DO UPDATE SET
                last_event_id = MAX(source_cursors.last_event_id, excluded.last_event_id),
                updated_at = excluded.updated_at
            "#,
            params![source_name, last_event_id, now],
        )?;

        Ok(())
    }
}
