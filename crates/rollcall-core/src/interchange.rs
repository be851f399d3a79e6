//! CSV import and export of attendance records.
//!
//! Two input layouts are understood:
//!
//! - the kiosk register log: `Name`, `Datetime` (`YYYY/MM/DD, HH:MM:SS`),
//!   one row per sighting;
//! - the export layout written by [`export_csv`], so an export can be loaded
//!   back into an empty ledger.
//!
//! Only the first row per (name, date) becomes a check-in; later rows for the
//! same day are counted as duplicates and dropped. Register logs are not
//! paired into check-in/check-out.

use crate::error::AttendanceError;
use crate::ledger::{CheckInWrite, CheckOutWrite, Ledger};
use crate::types::{AttendanceRecord, DATE_FORMAT, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::io::{Read, Write};

/// Timestamp format of the register log's `Datetime` column.
pub const REGISTER_LOG_FORMAT: &str = "%Y/%m/%d, %H:%M:%S";
/// Sentinel the recognizer writes for faces it could not identify.
pub const UNKNOWN_IDENTITY: &str = "Unknown";
pub const EXPORT_HEADERS: [&str; 6] = [
    "Name",
    "Date",
    "Check In Time",
    "Check Out Time",
    "Total Hours",
    "Status",
];

/// Tally of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// New check-ins written.
    pub imported: usize,
    /// Check-outs restored from export-layout rows.
    pub checked_out: usize,
    /// Rows dropped because the (name, date) already had a record.
    pub duplicates: usize,
    /// Check-outs not restored because they precede the check-in. The
    /// check-in itself is still counted in `imported`.
    pub check_out_rejected: usize,
    /// Rows without a name, or for the `Unknown` identity.
    pub ignored: usize,
    /// Malformed rows skipped.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    RegisterLog { name: usize, datetime: usize },
    Export {
        name: usize,
        check_in: usize,
        check_out: Option<usize>,
    },
}

impl Layout {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, AttendanceError> {
        let find = |wanted: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(wanted))
        };
        let name = find("Name").ok_or_else(|| {
            AttendanceError::InvalidInput("CSV must have a 'Name' column".into())
        })?;
        if let Some(datetime) = find("Datetime") {
            return Ok(Self::RegisterLog { name, datetime });
        }
        if let Some(check_in) = find("Check In Time") {
            return Ok(Self::Export {
                name,
                check_in,
                check_out: find("Check Out Time"),
            });
        }
        Err(AttendanceError::InvalidInput(
            "CSV must have a 'Datetime' or 'Check In Time' column".into(),
        ))
    }
}

/// One usable import row.
#[derive(Debug)]
struct Entry {
    name: String,
    check_in: NaiveDateTime,
    check_out: Option<NaiveDateTime>,
}

fn parse_row(layout: Layout, row: &csv::StringRecord, line: u64) -> Result<Option<Entry>, AttendanceError> {
    let field = |idx: usize| row.get(idx).map(str::trim).unwrap_or("");
    let malformed = |reason: String| AttendanceError::MalformedImport { line, reason };

    let (name_idx, stamp_idx, format) = match layout {
        Layout::RegisterLog { name, datetime } => (name, datetime, REGISTER_LOG_FORMAT),
        Layout::Export { name, check_in, .. } => (name, check_in, TIMESTAMP_FORMAT),
    };
    if row.get(name_idx).is_none() || row.get(stamp_idx).is_none() {
        return Err(malformed(format!("expected at least {} fields, got {}", name_idx.max(stamp_idx) + 1, row.len())));
    }

    let name = field(name_idx);
    let stamp = field(stamp_idx);
    if name.is_empty() || name == UNKNOWN_IDENTITY {
        return Ok(None);
    }
    if stamp.is_empty() {
        return Err(malformed(format!("no timestamp for {name}")));
    }
    let check_in = NaiveDateTime::parse_from_str(stamp, format)
        .map_err(|e| malformed(format!("bad datetime {stamp:?}: {e}")))?;

    let check_out = match layout {
        Layout::Export {
            check_out: Some(idx),
            ..
        } if !field(idx).is_empty() => {
            let raw = field(idx);
            Some(
                NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
                    .map_err(|e| malformed(format!("bad check-out time {raw:?}: {e}")))?,
            )
        }
        _ => None,
    };

    Ok(Some(Entry {
        name: name.to_string(),
        check_in,
        check_out,
    }))
}

/// Import attendance rows into `ledger`.
///
/// Malformed rows are logged, counted and skipped. A ledger failure aborts
/// the import, since every following write would fail the same way.
pub fn import_csv<L: Ledger + ?Sized, R: Read>(ledger: &L, reader: R) -> Result<ImportReport, AttendanceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| AttendanceError::InvalidInput(format!("cannot read CSV header: {e}")))?
        .clone();
    let layout = Layout::from_headers(&headers)?;

    let mut report = ImportReport::default();
    for (i, row) in csv_reader.records().enumerate() {
        // Header is line 1.
        let line = i as u64 + 2;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(line, error = %e, "skipping unreadable CSV row");
                report.skipped += 1;
                continue;
            }
        };
        let entry = match parse_row(layout, &row, line) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                report.ignored += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed CSV row");
                report.skipped += 1;
                continue;
            }
        };

        let date = entry.check_in.date();
        match ledger.insert_check_in(&entry.name, date, entry.check_in)? {
            CheckInWrite::AlreadyOpen => {
                report.duplicates += 1;
                continue;
            }
            CheckInWrite::Recorded(_) => report.imported += 1,
        }

        if let Some(out) = entry.check_out {
            match ledger.update_check_out(&entry.name, date, out) {
                Ok(CheckOutWrite::Recorded(_)) => report.checked_out += 1,
                Ok(CheckOutWrite::NoOpenRecord) => {}
                Err(e @ AttendanceError::CheckOutBeforeCheckIn { .. }) => {
                    tracing::warn!(line, error = %e, "check-out not restored");
                    report.check_out_rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    tracing::info!(
        imported = report.imported,
        duplicates = report.duplicates,
        check_out_rejected = report.check_out_rejected,
        ignored = report.ignored,
        skipped = report.skipped,
        "CSV import finished"
    );
    Ok(report)
}

/// Write `records` in the export layout. Returns the number of data rows.
pub fn export_csv<W: Write>(records: &[AttendanceRecord], writer: W) -> Result<usize, AttendanceError> {
    let to_io = |e: csv::Error| AttendanceError::Io(std::io::Error::other(e.to_string()));
    let mut csv_writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);

    csv_writer.write_record(EXPORT_HEADERS).map_err(to_io)?;
    for record in records {
        let stamp = |t: Option<NaiveDateTime>| t.map(|t| t.format(TIMESTAMP_FORMAT).to_string()).unwrap_or_default();
        csv_writer
            .write_record([
                record.name.clone(),
                record.date.format(DATE_FORMAT).to_string(),
                stamp(record.check_in),
                stamp(record.check_out),
                record.total_hours.map(|h| format!("{h:.2}")).unwrap_or_default(),
                record.status.clone(),
            ])
            .map_err(to_io)?;
    }
    csv_writer.flush()?;
    Ok(records.len())
}
