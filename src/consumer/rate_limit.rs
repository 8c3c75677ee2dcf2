//! Request-time store backing the per-source rate limit
//!
//! Records when a fetch was last *attempted* for a source, regardless of how
//! the attempt ended, so an unhealthy source is not hammered with retries.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use super::db::{lock_conn, SharedConnection};
use super::error::StoreError;

#[async_trait]
pub trait RequestTimeStore: Send + Sync {
    /// Last attempt in epoch milliseconds; 0 for a source never attempted, so
    /// the first poll of any source is never throttled
    async fn get_last_request_time(&self, source_name: &str) -> Result<i64, StoreError>;

    /// Unconditional overwrite
    async fn update_last_request_time(
        &self,
        source_name: &str,
        timestamp_ms: i64,
    ) -> Result<(), StoreError>;
}

/// SQLite implementation of RequestTimeStore (`source_request_times` table)
pub struct SqliteRequestTimeStore {
    conn: SharedConnection,
}

impl SqliteRequestTimeStore {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RequestTimeStore for SqliteRequestTimeStore {
    async fn get_last_request_time(&self, source_name: &str) -> Result<i64, StoreError> {
        let conn = lock_conn(&self.conn)?;
        let last: Option<i64> = conn
            .query_row(
                "SELECT last_request_ms FROM source_request_times WHERE source_name = ?1",
                params![source_name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(last.unwrap_or(0))
    }

    async fn update_last_request_time(
        &self,
        source_name: &str,
        timestamp_ms: i64,
    ) -> Result<(), StoreError> {
        let conn = lock_conn(&self.conn)?;
        conn.execute(
            r#"
            INSERT INTO source_request_times (source_name, last_request_ms)
            VALUES (?1, ?2)
            ON CONFLICT(source_name) DO UPDATE SET last_request_ms = excluded.last_request_ms
            "#,
            params![source_name, timestamp_ms],
        )?;
        Ok(())
    }
}
