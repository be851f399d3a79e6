//! rollcall-store — SQLite attendance ledger and employee roster.
//!
//! The `(name, date)` unique index is what keeps a second check-in from
//! landing, whether it comes from the kiosk daemon or the operator CLI
//! running in another process.

pub mod ledger;
pub mod roster;
mod schema;

pub use ledger::SqliteLedger;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot create data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("schema setup failed: {0}")]
    Schema(String),
}

impl From<StoreError> for rollcall_core::AttendanceError {
    fn from(err: StoreError) -> Self {
        Self::LedgerUnavailable(err.to_string())
    }
}

/// Default database location: `$XDG_DATA_HOME/rollcall/attendance.db`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("attendance.db")
}
