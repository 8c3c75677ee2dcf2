//! SQLite plumbing shared by the durable stores
//!
//! Every consumer process opens the same database file. WAL mode plus a busy
//! timeout let them interleave writes without `SQLITE_BUSY` failures on short
//! contention.

use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::error::StoreError;

/// One connection shared by the stores of a single process
pub type SharedConnection = Arc<Mutex<Connection>>;

/// How long a writer waits for another process's write lock before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply connection-level PRAGMAs (WAL, NORMAL sync, busy timeout)
pub fn apply_connection_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

/// Open (or create) the database file with pragmas applied
pub fn open_database(db_path: impl AsRef<Path>) -> Result<Connection, StoreError> {
    let conn = Connection::open(db_path)?;
    apply_connection_pragmas(&conn)?;
    Ok(conn)
}

pub fn open_shared(db_path: impl AsRef<Path>) -> Result<SharedConnection, StoreError> {
    Ok(Arc::new(Mutex::new(open_database(db_path)?)))
}

/// Run schema migrations from SQL files
///
/// Reads every `.sql` file in `schema_dir` in file-name order (`00_`, `01_`, ...)
/// and executes it. Files must use `IF NOT EXISTS` so reruns are no-ops.
pub fn run_schema_migrations(
    conn: &mut Connection,
    schema_dir: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(format!("Schema directory not found: {}", schema_dir).into());
    }

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    let tx = conn.transaction()?;
    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::debug!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        tx.execute_batch(&sql_content)?;
    }
    tx.commit()?;

    log::info!("✅ Schema migrations completed");
    Ok(())
}

/// Lock a shared connection, mapping poisoning to a store error
pub(crate) fn lock_conn(
    conn: &SharedConnection,
) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::Poisoned("sqlite connection"))
}
