use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage and display format for attendance timestamps (local wall clock).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// ISO calendar date format. Lexical order equals chronological order.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Status tag given to every new attendance record.
pub const STATUS_PRESENT: &str = "present";

/// Normalized key used to match identities case-insensitively.
pub fn identity_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Hours between check-in and check-out, or `None` if check-out precedes check-in.
pub fn worked_hours(check_in: NaiveDateTime, check_out: NaiveDateTime) -> Option<f64> {
    let seconds = check_out.signed_duration_since(check_in).num_seconds();
    if seconds < 0 {
        return None;
    }
    Some(seconds as f64 / 3600.0)
}

/// A registered employee. Never hard-deleted; deactivation clears `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    /// Display name, unique ignoring case.
    pub name: String,
    /// Optional external employee code (e.g. "EMP001").
    pub employee_code: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub active: bool,
    pub created_at: String,
}

/// Registration request for a new employee.
#[derive(Debug, Clone, Default)]
pub struct NewEmployee {
    pub name: String,
    pub employee_code: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
}

impl NewEmployee {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One attendance row: at most one per (name, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub check_in: Option<NaiveDateTime>,
    pub check_out: Option<NaiveDateTime>,
    /// `check_out - check_in` in fractional hours, set by the check-out.
    pub total_hours: Option<f64>,
    pub status: String,
}

impl AttendanceRecord {
    /// Checked in and not yet checked out.
    pub fn is_open(&self) -> bool {
        self.check_in.is_some() && self.check_out.is_none()
    }
}

/// A known identity seen by the oracle. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    pub identity: String,
    /// Displayed confidence, `100 - distance` clamped at 0.
    pub confidence: f64,
    pub at: NaiveDateTime,
}

/// Filter for report queries. Bounds are inclusive; the name match ignores case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub name: Option<String>,
}

impl ReportFilter {
    /// Every record on a single date.
    pub fn on(date: NaiveDate) -> Self {
        Self {
            start: Some(date),
            end: Some(date),
            name: None,
        }
    }

    /// The records of one identity on a single date.
    pub fn identity_on(name: &str, date: NaiveDate) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::on(date)
        }
    }

    pub fn matches(&self, record: &AttendanceRecord) -> bool {
        self.start.map_or(true, |s| record.date >= s)
            && self.end.map_or(true, |e| record.date <= e)
            && self
                .name
                .as_deref()
                .map_or(true, |n| identity_key(n) == identity_key(&record.name))
    }
}

/// Report ordering: date descending, then identity key ascending.
pub fn sort_for_report(records: &mut [AttendanceRecord]) {
    records.sort_by_cached_key(|r| (std::cmp::Reverse(r.date), identity_key(&r.name)));
}

/// Point-in-time attendance statistics for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_employees: u64,
    pub present_employees: u64,
    pub absent_employees: u64,
    /// Percentage in [0, 100].
    pub attendance_rate: f64,
    pub average_hours: f64,
}

impl fmt::Display for DailySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Date: {}", self.date.format(DATE_FORMAT))?;
        writeln!(f, "Total Employees: {}", self.total_employees)?;
        writeln!(f, "Present: {}", self.present_employees)?;
        writeln!(f, "Absent: {}", self.absent_employees)?;
        writeln!(f, "Attendance Rate: {:.1}%", self.attendance_rate)?;
        write!(f, "Average Hours: {:.2}", self.average_hours)
    }
}
