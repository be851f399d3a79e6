//! The attendance ledger contract and the check-in/check-out helpers built on it.

use crate::error::AttendanceError;
use crate::types::{AttendanceRecord, ReportFilter};
use chrono::{NaiveDate, NaiveDateTime};

/// Result of a conditional check-in insert.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckInWrite {
    Recorded(AttendanceRecord),
    /// A record already exists for this identity and date; nothing was written.
    AlreadyOpen,
}

/// Result of a check-out update.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutWrite {
    Recorded(AttendanceRecord),
    /// No checked-in, not yet checked-out record for this identity and date.
    NoOpenRecord,
}

/// Durable store of attendance records.
///
/// `insert_check_in` must be a conditional insert enforced by the store itself:
/// the in-memory cache is never trusted to prevent duplicates, because manual
/// and automatic check-ins can race from different processes.
pub trait Ledger {
    fn insert_check_in(
        &self,
        name: &str,
        date: NaiveDate,
        at: NaiveDateTime,
    ) -> Result<CheckInWrite, AttendanceError>;

    /// Close the open record and set `total_hours`. Returns
    /// [`AttendanceError::CheckOutBeforeCheckIn`] without writing when `at`
    /// precedes the check-in.
    fn update_check_out(
        &self,
        name: &str,
        date: NaiveDate,
        at: NaiveDateTime,
    ) -> Result<CheckOutWrite, AttendanceError>;

    /// Records matching `filter`, ordered by date descending then name ascending.
    fn query(&self, filter: &ReportFilter) -> Result<Vec<AttendanceRecord>, AttendanceError>;

    fn count_active_employees(&self) -> Result<u64, AttendanceError>;
}

fn validate_name(name: &str) -> Result<&str, AttendanceError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AttendanceError::InvalidInput("name cannot be empty".into()));
    }
    Ok(trimmed)
}

/// Record a check-in at `at` on `at`'s calendar date.
pub fn record_check_in<L: Ledger + ?Sized>(
    ledger: &L,
    name: &str,
    at: NaiveDateTime,
) -> Result<AttendanceRecord, AttendanceError> {
    let name = validate_name(name)?;
    let date = at.date();
    match ledger.insert_check_in(name, date, at)? {
        CheckInWrite::Recorded(record) => {
            tracing::info!(name, %at, "checked in");
            Ok(record)
        }
        CheckInWrite::AlreadyOpen => Err(AttendanceError::AlreadyCheckedIn {
            name: name.to_string(),
            date,
        }),
    }
}

/// Record a check-out at `at` against the record for `at`'s calendar date.
pub fn record_check_out<L: Ledger + ?Sized>(
    ledger: &L,
    name: &str,
    at: NaiveDateTime,
) -> Result<AttendanceRecord, AttendanceError> {
    let name = validate_name(name)?;
    let date = at.date();
    match ledger.update_check_out(name, date, at)? {
        CheckOutWrite::Recorded(record) => {
            tracing::info!(name, %at, hours = ?record.total_hours, "checked out");
            Ok(record)
        }
        CheckOutWrite::NoOpenRecord => Err(AttendanceError::NoOpenRecord {
            name: name.to_string(),
            date,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, MemoryLedger};
    use chrono::TimeDelta;
    use proptest::prelude::*;

    #[test]
    fn test_check_in_then_out_nine_hours() {
        let ledger = MemoryLedger::new(1);
        record_check_in(&ledger, "Jane Doe", at("2024-01-10 08:45:00")).unwrap();
        let record = record_check_out(&ledger, "Jane Doe", at("2024-01-10 17:45:00")).unwrap();
        assert_eq!(record.total_hours, Some(9.0));
        assert!(!record.is_open());
    }

    #[test]
    fn test_second_check_in_same_day_refused() {
        let ledger = MemoryLedger::new(1);
        record_check_in(&ledger, "Jane Doe", at("2024-01-10 08:45:00")).unwrap();
        let writes = ledger.writes();

        let err = record_check_in(&ledger, "Jane Doe", at("2024-01-10 09:00:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyCheckedIn { .. }));
        assert_eq!(ledger.writes(), writes);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_check_out_without_check_in() {
        let ledger = MemoryLedger::new(1);
        let err = record_check_out(&ledger, "Bob", at("2024-01-10 17:00:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::NoOpenRecord { ref name, .. } if name == "Bob"));
    }

    #[test]
    fn test_check_out_twice_refused() {
        let ledger = MemoryLedger::new(1);
        record_check_in(&ledger, "Bob", at("2024-01-10 08:00:00")).unwrap();
        record_check_out(&ledger, "Bob", at("2024-01-10 12:00:00")).unwrap();
        let err = record_check_out(&ledger, "Bob", at("2024-01-10 17:00:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::NoOpenRecord { .. }));
    }

    #[test]
    fn test_check_out_before_check_in() {
        let ledger = MemoryLedger::new(1);
        record_check_in(&ledger, "Bob", at("2024-01-10 08:00:00")).unwrap();
        let err = record_check_out(&ledger, "Bob", at("2024-01-10 07:00:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::CheckOutBeforeCheckIn { .. }));
    }

    #[test]
    fn test_empty_name_rejected() {
        let ledger = MemoryLedger::new(1);
        let err = record_check_in(&ledger, "   ", at("2024-01-10 08:00:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::InvalidInput(_)));
        assert_eq!(ledger.writes(), 0);
    }

    proptest! {
        /// For any check-out at or after the check-in on the same day,
        /// `total_hours` is exactly the elapsed time in hours.
        #[test]
        fn prop_total_hours_matches_elapsed(
            secs_in in 0i64..43_200,
            worked in 0i64..43_199,
        ) {
            let ledger = MemoryLedger::new(1);
            let check_in = at("2024-01-10 00:00:00") + TimeDelta::seconds(secs_in);
            let check_out = check_in + TimeDelta::seconds(worked);
            record_check_in(&ledger, "Jane Doe", check_in).unwrap();
            let record = record_check_out(&ledger, "Jane Doe", check_out).unwrap();

            let hours = record.total_hours.unwrap();
            prop_assert!(hours >= 0.0);
            prop_assert_eq!(hours, worked as f64 / 3600.0);
            prop_assert_eq!(record.check_out, Some(check_out));
        }
    }
}
