use rusqlite::Connection;

use crate::error::StoreError;

/// Busy-timeout applied to every connection, reader or writer. The reference
/// value from the original `DbWriter`/`SqlitePool` pragmas.
const BUSY_TIMEOUT_MS: u32 = 5_000;

pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stages (
    id           TEXT PRIMARY KEY,
    created_at   INTEGER NOT NULL,
    started_at   INTEGER NOT NULL DEFAULT 0,
    completed_at INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS files (
    stage_id      TEXT NOT NULL REFERENCES stages(id) ON DELETE CASCADE,
    logical_path  TEXT NOT NULL,
    physical_path TEXT NOT NULL,
    state         TEXT NOT NULL,
    started_at    INTEGER NOT NULL DEFAULT 0,
    finished_at   INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (stage_id, logical_path)
);

CREATE INDEX IF NOT EXISTS idx_files_state ON files(state);
CREATE INDEX IF NOT EXISTS idx_files_physical_path ON files(physical_path);
";

/// Applies the concurrency pragmas every connection (reader or writer) needs:
/// `WAL` so readers never block a writer, `NORMAL` synchronous as the
/// accepted durability/throughput tradeoff for WAL, and a busy-timeout large
/// enough to absorb transient lock contention instead of failing fast.
pub(crate) fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|source| StoreError::Sqlite { source, context: Some("setting journal_mode".into()) })?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|source| StoreError::Sqlite { source, context: Some("setting synchronous".into()) })?;
    conn.busy_timeout(std::time::Duration::from_millis(u64::from(BUSY_TIMEOUT_MS)))
        .map_err(|source| StoreError::Sqlite { source, context: Some("setting busy_timeout".into()) })?;
    Ok(())
}

pub(crate) fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)
        .map_err(|source| StoreError::Sqlite { source, context: Some("creating schema".into()) })
}
