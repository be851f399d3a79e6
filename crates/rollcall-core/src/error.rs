use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Every way an attendance operation can fail.
///
/// The messages are shown to operators as-is, so they read as explanations
/// rather than diagnostics.
#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("{name} already checked in on {date}")]
    AlreadyCheckedIn { name: String, date: NaiveDate },
    #[error("no open check-in for {name} on {date}")]
    NoOpenRecord { name: String, date: NaiveDate },
    #[error("check-out for {name} at {check_out} is before check-in at {check_in}")]
    CheckOutBeforeCheckIn {
        name: String,
        check_in: NaiveDateTime,
        check_out: NaiveDateTime,
    },
    #[error("identity oracle unavailable: {0}")]
    OracleUnavailable(String),
    #[error("attendance ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("malformed import row at line {line}: {reason}")]
    MalformedImport { line: u64, reason: String },
    #[error("employee {0} already exists")]
    DuplicateEmployee(String),
    #[error("no active employee named {0}")]
    UnknownEmployee(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttendanceError {
    /// Expected refusals (duplicate check-in, missing check-in) as opposed to
    /// infrastructure failures.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCheckedIn { .. } | Self::NoOpenRecord { .. } | Self::CheckOutBeforeCheckIn { .. }
        )
    }
}
