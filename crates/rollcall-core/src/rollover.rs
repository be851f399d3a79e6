//! Daily rollover: rebuilding the checked-in cache from the ledger.
//!
//! The cache is a projection of the ledger. Reconciliation computes the full
//! set for a date first and the tracker swaps it in only on success, so a
//! failed query never leaves a half-applied cache behind.

use crate::error::AttendanceError;
use crate::ledger::Ledger;
use crate::types::{identity_key, ReportFilter};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::fmt;

/// Identity keys of everyone with a check-in on `date`, per the ledger.
pub fn checked_in_on<L: Ledger + ?Sized>(
    ledger: &L,
    date: NaiveDate,
) -> Result<HashSet<String>, AttendanceError> {
    let records = ledger.query(&ReportFilter::on(date))?;
    Ok(records
        .iter()
        .filter(|r| r.check_in.is_some())
        .map(|r| identity_key(&r.name))
        .collect())
}

/// What a rollover tick did to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloverOutcome {
    /// Same day and the cache is current.
    Unchanged,
    /// Same day, but a previously failed reconciliation was retried.
    Refreshed { checked_in: usize },
    /// The date advanced; the cache was cleared and rebuilt for `to`.
    Advanced {
        from: NaiveDate,
        to: NaiveDate,
        checked_in: usize,
    },
}

impl fmt::Display for RolloverOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Refreshed { checked_in } => write!(f, "refreshed ({checked_in} checked in)"),
            Self::Advanced {
                from,
                to,
                checked_in,
            } => write!(f, "advanced {from} -> {to} ({checked_in} checked in)"),
        }
    }
}
