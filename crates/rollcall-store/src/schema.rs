use crate::StoreError;
use rollcall_core::types::identity_key;
use rusqlite::{params, Connection};
use std::time::Duration;

// Column and table names match the register-log databases the kiosk has
// always written, so existing files open in place. `name_key` holds
// `identity_key(name)`; SQLite's NOCASE only folds ASCII, so every name
// match and uniqueness check goes through the key instead.
const TABLES: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    name_key TEXT NOT NULL,
    date TEXT NOT NULL,
    check_in_time TEXT,
    check_out_time TEXT,
    total_hours REAL,
    status TEXT DEFAULT 'present',
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS employees (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    name_key TEXT NOT NULL,
    employee_id TEXT UNIQUE,
    department TEXT,
    position TEXT,
    is_active BOOLEAN DEFAULT 1,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
";

const INDEXES: &str = "
DROP INDEX IF EXISTS uq_attendance_name_date;
DROP INDEX IF EXISTS idx_attendance_name_date;

CREATE UNIQUE INDEX IF NOT EXISTS uq_attendance_key_date
    ON attendance(name_key, date);

CREATE UNIQUE INDEX IF NOT EXISTS uq_employees_key
    ON employees(name_key);
";

/// WAL for concurrent readers, and a busy timeout so a writer in another
/// process delays us by at most `busy_timeout` instead of failing outright.
pub(crate) fn configure(conn: &Connection, busy_timeout: Duration) -> Result<(), StoreError> {
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(busy_timeout)?;
    tracing::debug!(journal_mode = %mode, ?busy_timeout, "sqlite connection configured");
    Ok(())
}

pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(TABLES).map_err(|e| StoreError::Schema(e.to_string()))?;
    for table in ["attendance", "employees"] {
        if !has_column(&tx, table, "name_key")? {
            add_name_key(&tx, table)?;
        }
    }
    tx.execute_batch(INDEXES).map_err(|e| {
        // Typically an older database holding duplicate same-day rows, which
        // the unique index cannot be built over.
        StoreError::Schema(e.to_string())
    })?;
    tx.commit()?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Databases written before `name_key` existed get the column added and
/// back-filled from `name`.
fn add_name_key(conn: &Connection, table: &str) -> Result<(), StoreError> {
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN name_key TEXT"))?;

    let rows: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(&format!("SELECT id, name FROM {table}"))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };
    let mut update = conn.prepare(&format!("UPDATE {table} SET name_key = ?1 WHERE id = ?2"))?;
    for (id, name) in &rows {
        update.execute(params![identity_key(name), id])?;
    }
    tracing::info!(table, rows = rows.len(), "name_key column added");
    Ok(())
}
