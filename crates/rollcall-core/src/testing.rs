//! In-memory ledger used by the unit tests.

use crate::error::AttendanceError;
use crate::ledger::{CheckInWrite, CheckOutWrite, Ledger};
use crate::types::{
    identity_key, sort_for_report, worked_hours, AttendanceRecord, ReportFilter, STATUS_PRESENT,
    TIMESTAMP_FORMAT,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::cell::{Cell, RefCell};

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
}

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub struct MemoryLedger {
    records: RefCell<Vec<AttendanceRecord>>,
    active: Cell<u64>,
    writes: Cell<usize>,
    down: Cell<bool>,
}

impl MemoryLedger {
    pub fn new(active: u64) -> Self {
        Self {
            records: RefCell::new(Vec::new()),
            active: Cell::new(active),
            writes: Cell::new(0),
            down: Cell::new(false),
        }
    }

    /// Number of successful mutations.
    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn set_down(&self, down: bool) {
        self.down.set(down);
    }

    /// Insert a record behind the tracker's back, as another process would.
    pub fn insert_raw(&self, name: &str, check_in: NaiveDateTime) {
        let mut records = self.records.borrow_mut();
        let id = records.len() as i64 + 1;
        records.push(AttendanceRecord {
            id,
            name: name.into(),
            date: check_in.date(),
            check_in: Some(check_in),
            check_out: None,
            total_hours: None,
            status: STATUS_PRESENT.into(),
        });
    }

    fn check_up(&self) -> Result<(), AttendanceError> {
        if self.down.get() {
            return Err(AttendanceError::LedgerUnavailable("ledger is down".into()));
        }
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn insert_check_in(
        &self,
        name: &str,
        date: NaiveDate,
        at: NaiveDateTime,
    ) -> Result<CheckInWrite, AttendanceError> {
        self.check_up()?;
        let key = identity_key(name);
        let exists = self
            .records
            .borrow()
            .iter()
            .any(|r| r.date == date && identity_key(&r.name) == key);
        if exists {
            return Ok(CheckInWrite::AlreadyOpen);
        }
        self.insert_raw(name, at);
        self.writes.set(self.writes.get() + 1);
        let record = self.records.borrow().last().cloned().unwrap();
        Ok(CheckInWrite::Recorded(record))
    }

    fn update_check_out(
        &self,
        name: &str,
        date: NaiveDate,
        at: NaiveDateTime,
    ) -> Result<CheckOutWrite, AttendanceError> {
        self.check_up()?;
        let key = identity_key(name);
        let mut records = self.records.borrow_mut();
        let Some(record) = records
            .iter_mut()
            .find(|r| r.date == date && identity_key(&r.name) == key && r.is_open())
        else {
            return Ok(CheckOutWrite::NoOpenRecord);
        };
        let check_in = record.check_in.unwrap();
        let hours = worked_hours(check_in, at).ok_or_else(|| AttendanceError::CheckOutBeforeCheckIn {
            name: name.into(),
            check_in,
            check_out: at,
        })?;
        record.check_out = Some(at);
        record.total_hours = Some(hours);
        self.writes.set(self.writes.get() + 1);
        Ok(CheckOutWrite::Recorded(record.clone()))
    }

    fn query(&self, filter: &ReportFilter) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        self.check_up()?;
        let mut out: Vec<_> = self
            .records
            .borrow()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_for_report(&mut out);
        Ok(out)
    }

    fn count_active_employees(&self) -> Result<u64, AttendanceError> {
        self.check_up()?;
        Ok(self.active.get())
    }
}
