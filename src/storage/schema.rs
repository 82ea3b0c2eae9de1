//! Database schema creation.

use rusqlite::{Connection, Result};

/// Create all database tables and indexes.
pub fn create_tables(conn: &Connection) -> Result<()> {
    // Key-value table backing the persisted wallet session
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Submissions table: one row per transaction sent to the ledger
    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            address TEXT NOT NULL,
            flow TEXT NOT NULL,
            step TEXT NOT NULL,
            tx_hash TEXT,
            status TEXT NOT NULL,
            error TEXT,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_time ON submissions(timestamp DESC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_hash ON submissions(tx_hash)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status)",
        [],
    )?;

    Ok(())
}
