//! Daily summary statistics and report filters.

use crate::error::AttendanceError;
use crate::ledger::Ledger;
use crate::types::{identity_key, AttendanceRecord, DailySummary, ReportFilter};
use chrono::{Days, NaiveDate};
use std::collections::HashSet;

/// Default window for an employee's attendance history.
pub const DEFAULT_HISTORY_DAYS: u64 = 30;

/// Summarize attendance on `date` from the ledger.
pub fn daily_summary<L: Ledger + ?Sized>(
    ledger: &L,
    date: NaiveDate,
) -> Result<DailySummary, AttendanceError> {
    let total = ledger.count_active_employees()?;
    let records = ledger.query(&ReportFilter::on(date))?;
    Ok(summarize(date, total, &records))
}

/// Pure aggregation over one day's records.
pub fn summarize(date: NaiveDate, total_employees: u64, records: &[AttendanceRecord]) -> DailySummary {
    let present: HashSet<String> = records
        .iter()
        .filter(|r| r.date == date && r.check_in.is_some())
        .map(|r| identity_key(&r.name))
        .collect();
    let present_employees = present.len() as u64;

    if present_employees > total_employees {
        tracing::warn!(
            %date,
            present = present_employees,
            total = total_employees,
            "more employees present than active; roster and ledger disagree"
        );
    }
    let absent_employees = total_employees.saturating_sub(present_employees);

    let attendance_rate = if total_employees == 0 {
        0.0
    } else {
        (present_employees as f64 / total_employees as f64 * 100.0).clamp(0.0, 100.0)
    };

    let hours: Vec<f64> = records
        .iter()
        .filter(|r| r.date == date)
        .filter_map(|r| r.total_hours)
        .collect();
    let average_hours = if hours.is_empty() {
        0.0
    } else {
        round2(hours.iter().sum::<f64>() / hours.len() as f64)
    };

    DailySummary {
        date,
        total_employees,
        present_employees,
        absent_employees,
        attendance_rate,
        average_hours,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Filter for one employee's records over the last `days` days up to `today`.
pub fn history_filter(name: &str, days: u64, today: NaiveDate) -> ReportFilter {
    ReportFilter {
        start: Some(today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)),
        end: Some(today),
        name: Some(name.to_string()),
    }
}
