//! rollcall-core — Attendance state tracking for a face-recognition kiosk.
//!
//! Face recognition itself happens in an external vision process; this crate
//! decides what a recognized identity means for the attendance ledger: the
//! per-day checked-in cache, the cooldown gate, daily rollover and reporting.

pub mod capture;
pub mod error;
pub mod interchange;
pub mod ledger;
pub mod oracle;
pub mod report;
pub mod rollover;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::AttendanceError;
pub use ledger::{CheckInWrite, CheckOutWrite, Ledger};
pub use oracle::{Identification, IdentityOracle, LabelMap, Prediction};
pub use tracker::{AttendanceRequest, AttendanceTracker, Outcome, TrackerConfig};
pub use types::{AttendanceRecord, DailySummary, Employee, NewEmployee, RecognitionEvent, ReportFilter};
