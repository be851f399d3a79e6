//! [`Ledger`] implementation on SQLite.

use crate::{schema, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::ledger::{CheckInWrite, CheckOutWrite, Ledger};
use rollcall_core::types::{identity_key, worked_hours, AttendanceRecord, ReportFilter, DATE_FORMAT, STATUS_PRESENT, TIMESTAMP_FORMAT};
use rollcall_core::AttendanceError;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// Busy timeout used when the caller does not choose one.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

const RECORD_COLUMNS: &str = "id, name, date, check_in_time, check_out_time, total_hours, status";

/// Attendance ledger and employee roster backed by one SQLite connection.
pub struct SqliteLedger {
    pub(crate) conn: Connection,
}

impl SqliteLedger {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::DataDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        schema::configure(&conn, busy_timeout)?;
        schema::migrate(&conn)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(Self { conn })
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn record_by_id(&self, id: i64) -> Result<AttendanceRecord, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM attendance WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![id], record_from_row)?)
    }
}

impl Ledger for SqliteLedger {
    fn insert_check_in(
        &self,
        name: &str,
        date: NaiveDate,
        at: NaiveDateTime,
    ) -> Result<CheckInWrite, AttendanceError> {
        // The unique (name_key, date) index turns this into an atomic
        // check-and-insert, whichever process gets there first.
        let inserted = self
            .conn
            .execute(
                "INSERT INTO attendance (name, name_key, date, check_in_time, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT DO NOTHING",
                params![
                    name,
                    identity_key(name),
                    date.format(DATE_FORMAT).to_string(),
                    at.format(TIMESTAMP_FORMAT).to_string(),
                    STATUS_PRESENT
                ],
            )
            .map_err(StoreError::from)?;

        if inserted == 0 {
            tracing::debug!(name, %date, "check-in refused by ledger");
            return Ok(CheckInWrite::AlreadyOpen);
        }
        let record = self.record_by_id(self.conn.last_insert_rowid())?;
        Ok(CheckInWrite::Recorded(record))
    }

    fn update_check_out(
        &self,
        name: &str,
        date: NaiveDate,
        at: NaiveDateTime,
    ) -> Result<CheckOutWrite, AttendanceError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let open: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, check_in_time FROM attendance
                 WHERE name_key = ?1 AND date = ?2
                   AND check_in_time IS NOT NULL AND check_out_time IS NULL
                 ORDER BY id LIMIT 1",
                params![identity_key(name), date.format(DATE_FORMAT).to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(StoreError::from)?;

        let Some((id, raw_check_in)) = open else {
            return Ok(CheckOutWrite::NoOpenRecord);
        };
        let check_in = NaiveDateTime::parse_from_str(&raw_check_in, TIMESTAMP_FORMAT).map_err(|e| {
            AttendanceError::LedgerUnavailable(format!("record {id} has unreadable check-in {raw_check_in:?}: {e}"))
        })?;
        let hours = worked_hours(check_in, at).ok_or_else(|| AttendanceError::CheckOutBeforeCheckIn {
            name: name.to_string(),
            check_in,
            check_out: at,
        })?;

        tx.execute(
            "UPDATE attendance SET check_out_time = ?1, total_hours = ?2
             WHERE id = ?3 AND check_out_time IS NULL",
            params![at.format(TIMESTAMP_FORMAT).to_string(), hours, id],
        )
        .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;

        Ok(CheckOutWrite::Recorded(self.record_by_id(id)?))
    }

    fn query(&self, filter: &ReportFilter) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM attendance WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(start) = filter.start {
            sql.push_str(" AND date >= ?");
            args.push(start.format(DATE_FORMAT).to_string());
        }
        if let Some(end) = filter.end {
            sql.push_str(" AND date <= ?");
            args.push(end.format(DATE_FORMAT).to_string());
        }
        if let Some(name) = &filter.name {
            sql.push_str(" AND name_key = ?");
            args.push(identity_key(name));
        }
        sql.push_str(" ORDER BY date DESC, name_key ASC");

        let mut stmt = self.conn.prepare(&sql).map_err(StoreError::from)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), record_from_row)
            .map_err(StoreError::from)?;
        let records = rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)?;
        Ok(records)
    }

    fn count_active_employees(&self) -> Result<u64, AttendanceError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM employees WHERE is_active = 1", [], |row| row.get(0))
            .map_err(StoreError::from)?;
        Ok(count.max(0) as u64)
    }
}

fn parse_column<T>(idx: usize, raw: &str, parse: impl FnOnce(&str) -> chrono::ParseResult<T>) -> rusqlite::Result<T> {
    parse(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let raw: Option<String> = row.get(idx)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_column(idx, s, |s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)).map(Some),
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let raw_date: String = row.get(2)?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        date: parse_column(2, &raw_date, |s| NaiveDate::parse_from_str(s, DATE_FORMAT))?,
        check_in: timestamp_column(row, 3)?,
        check_out: timestamp_column(row, 4)?,
        total_hours: row.get(5)?,
        status: row
            .get::<_, Option<String>>(6)?
            .unwrap_or_else(|| STATUS_PRESENT.to_string()),
    })
}
