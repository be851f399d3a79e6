//! Attendance state tracker.
//!
//! Decides, for every recognition or operator request, whether a ledger write
//! happens. Holds the per-day cache of checked-in identities and the
//! last-seen timestamps that drive the cooldown gate. The cache is only
//! updated after the ledger confirms a write, and is rebuilt from the ledger
//! whenever the ledger disagrees with it.

use crate::error::AttendanceError;
use crate::ledger::{self, Ledger};
use crate::report;
use crate::rollover::{self, RolloverOutcome};
use crate::types::{identity_key, AttendanceRecord, DailySummary, RecognitionEvent, ReportFilter};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Default minimum gap between automatic check-in attempts for one identity.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub cooldown: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Everything that can ask for an attendance transition. Automatic and
/// operator triggers go through the same tracker entry point.
#[derive(Debug, Clone)]
pub enum AttendanceRequest {
    Recognized(RecognitionEvent),
    ManualCheckIn { name: String, at: NaiveDateTime },
    ManualCheckOut { name: String, at: NaiveDateTime },
}

/// Non-error result of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    CheckedIn(AttendanceRecord),
    CheckedOut(AttendanceRecord),
    /// The cache already lists this identity for today; no write.
    AlreadyCheckedIn { name: String },
    /// Seen again within the cooldown window, or the event predates the
    /// tracker's day; no write.
    Suppressed { name: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckedIn(r) => match r.check_in {
                Some(t) => write!(f, "{} checked in at {}", r.name, t.format("%H:%M:%S")),
                None => write!(f, "{} checked in", r.name),
            },
            Self::CheckedOut(r) => {
                write!(f, "{} checked out", r.name)?;
                if let Some(t) = r.check_out {
                    write!(f, " at {}", t.format("%H:%M:%S"))?;
                }
                if let Some(h) = r.total_hours {
                    write!(f, " (total hours: {h:.2})")?;
                }
                Ok(())
            }
            Self::AlreadyCheckedIn { name } => write!(f, "{name} already checked in today"),
            Self::Suppressed { name } => write!(f, "{name} seen too recently; ignored"),
        }
    }
}

/// Per-day attendance cache in front of a [`Ledger`].
pub struct AttendanceTracker<L> {
    ledger: L,
    cooldown: TimeDelta,
    day: NaiveDate,
    checked_in: HashSet<String>,
    last_seen: HashMap<String, NaiveDateTime>,
    /// Set when the last reconciliation failed; the next rollover tick retries.
    stale: bool,
}

impl<L: Ledger> AttendanceTracker<L> {
    /// Create a tracker for `day` with an empty, stale cache. Call
    /// [`reconcile`](Self::reconcile) before serving requests.
    pub fn new(ledger: L, config: TrackerConfig, day: NaiveDate) -> Self {
        Self {
            ledger,
            cooldown: TimeDelta::from_std(config.cooldown).unwrap_or(TimeDelta::MAX),
            day,
            checked_in: HashSet::new(),
            last_seen: HashMap::new(),
            stale: true,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn checked_in_count(&self) -> usize {
        self.checked_in.len()
    }

    pub fn is_checked_in(&self, name: &str) -> bool {
        self.checked_in.contains(&identity_key(name))
    }

    /// Single entry point for every attendance trigger.
    pub fn handle(&mut self, request: AttendanceRequest) -> Result<Outcome, AttendanceError> {
        match request {
            AttendanceRequest::Recognized(event) => self.on_recognition(&event),
            AttendanceRequest::ManualCheckIn { name, at } => self.check_in(&name, at).map(Outcome::CheckedIn),
            AttendanceRequest::ManualCheckOut { name, at } => self.check_out(&name, at).map(Outcome::CheckedOut),
        }
    }

    /// Apply the cooldown gate and, if it passes, record a check-in.
    pub fn on_recognition(&mut self, event: &RecognitionEvent) -> Result<Outcome, AttendanceError> {
        let name = event.identity.trim();
        let key = identity_key(name);
        let date = event.at.date();

        if date > self.day {
            self.roll_forward(date);
        }
        if date < self.day {
            tracing::debug!(name, %event.at, day = %self.day, "event predates current day");
            return Ok(Outcome::Suppressed { name: name.into() });
        }

        if self.checked_in.contains(&key) {
            return Ok(Outcome::AlreadyCheckedIn { name: name.into() });
        }

        if let Some(last) = self.last_seen.get(&key) {
            if event.at.signed_duration_since(*last) < self.cooldown {
                tracing::trace!(name, "within cooldown");
                return Ok(Outcome::Suppressed { name: name.into() });
            }
        }
        self.last_seen.insert(key.clone(), event.at);

        match ledger::record_check_in(&self.ledger, name, event.at) {
            Ok(record) => {
                self.checked_in.insert(key);
                tracing::info!(name, confidence = event.confidence, "automatic check-in");
                Ok(Outcome::CheckedIn(record))
            }
            Err(err @ AttendanceError::AlreadyCheckedIn { .. }) => {
                self.resync(name, date);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Operator check-in. Refused if the ledger already has a record for the date.
    pub fn check_in(&mut self, name: &str, at: NaiveDateTime) -> Result<AttendanceRecord, AttendanceError> {
        let date = at.date();
        if date > self.day {
            self.roll_forward(date);
        }
        match ledger::record_check_in(&self.ledger, name, at) {
            Ok(record) => {
                if date == self.day {
                    self.checked_in.insert(identity_key(name));
                }
                Ok(record)
            }
            Err(err @ AttendanceError::AlreadyCheckedIn { .. }) => {
                self.resync(name.trim(), date);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Operator check-out. Refused if there is no open record for the date.
    /// The identity stays in the cache: a checked-out employee is still
    /// present for the day.
    pub fn check_out(&mut self, name: &str, at: NaiveDateTime) -> Result<AttendanceRecord, AttendanceError> {
        ledger::record_check_out(&self.ledger, name, at)
    }

    /// Rebuild the cache for the current day from the ledger. The new set is
    /// swapped in whole, or the cache is left untouched on failure.
    pub fn reconcile(&mut self) -> Result<usize, AttendanceError> {
        match rollover::checked_in_on(&self.ledger, self.day) {
            Ok(set) => {
                self.checked_in = set;
                self.stale = false;
                tracing::debug!(day = %self.day, checked_in = self.checked_in.len(), "cache reconciled");
                Ok(self.checked_in.len())
            }
            Err(err) => {
                self.stale = true;
                Err(err)
            }
        }
    }

    /// Advance to `today` if the calendar date moved, clearing all per-day
    /// state and reconciling for the new date. Safe to call redundantly.
    ///
    /// If reconciliation fails after advancing, the cache stays empty and is
    /// marked stale. An empty cache only costs extra ledger lookups; the
    /// ledger's own uniqueness check still prevents duplicates.
    pub fn roll_over(&mut self, today: NaiveDate) -> Result<RolloverOutcome, AttendanceError> {
        if today > self.day {
            let from = self.day;
            self.advance_to(today);
            let checked_in = self.reconcile()?;
            return Ok(RolloverOutcome::Advanced {
                from,
                to: today,
                checked_in,
            });
        }
        if self.stale {
            let checked_in = self.reconcile()?;
            return Ok(RolloverOutcome::Refreshed { checked_in });
        }
        Ok(RolloverOutcome::Unchanged)
    }

    pub fn summary(&self, date: NaiveDate) -> Result<DailySummary, AttendanceError> {
        report::daily_summary(&self.ledger, date)
    }

    fn advance_to(&mut self, date: NaiveDate) {
        tracing::info!(from = %self.day, to = %date, "day rolled over; clearing attendance cache");
        self.day = date;
        self.checked_in.clear();
        self.last_seen.clear();
        self.stale = true;
    }

    /// Rollover triggered by a request dated after the current day, ahead of
    /// the scheduled tick.
    fn roll_forward(&mut self, date: NaiveDate) {
        self.advance_to(date);
        if let Err(err) = self.reconcile() {
            tracing::warn!(error = %err, day = %date, "reconciliation after rollover failed; cache left empty");
        }
    }

    /// The ledger refused a check-in the cache allowed: take the ledger's word
    /// for this identity and date.
    fn resync(&mut self, name: &str, date: NaiveDate) {
        if date != self.day {
            return;
        }
        let key = identity_key(name);
        match self.ledger.query(&ReportFilter::identity_on(name, date)) {
            Ok(records) => {
                if records.iter().any(|r| r.check_in.is_some()) {
                    self.checked_in.insert(key);
                } else {
                    self.checked_in.remove(&key);
                }
                tracing::debug!(name, "cache resynchronized from ledger");
            }
            Err(err) => {
                tracing::warn!(error = %err, name, "resync query failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, day, MemoryLedger};
    use proptest::prelude::*;

    fn tracker(ledger: MemoryLedger, today: &str) -> AttendanceTracker<MemoryLedger> {
        let mut t = AttendanceTracker::new(ledger, TrackerConfig::default(), day(today));
        t.reconcile().unwrap();
        t
    }

    fn seen(name: &str, ts: &str) -> RecognitionEvent {
        RecognitionEvent {
            identity: name.into(),
            confidence: 60.0,
            at: at(ts),
        }
    }

    #[test]
    fn test_first_sighting_checks_in() {
        let mut t = tracker(MemoryLedger::new(1), "2024-01-10");
        let outcome = t.on_recognition(&seen("Jane Doe", "2024-01-10 08:45:00")).unwrap();
        assert!(matches!(outcome, Outcome::CheckedIn(_)));
        assert!(t.is_checked_in("jane doe"));
        assert_eq!(t.ledger().writes(), 1);
    }

    #[test]
    fn test_checked_in_identity_short_circuits() {
        let mut t = tracker(MemoryLedger::new(1), "2024-01-10");
        t.on_recognition(&seen("Jane Doe", "2024-01-10 08:45:00")).unwrap();
        let outcome = t.on_recognition(&seen("JANE DOE", "2024-01-10 09:45:00")).unwrap();
        assert_eq!(outcome, Outcome::AlreadyCheckedIn { name: "JANE DOE".into() });
        assert_eq!(t.ledger().writes(), 1);
    }

    #[test]
    fn test_cooldown_suppresses_retry_after_failure() {
        let ledger = MemoryLedger::new(1);
        ledger.set_down(true);
        let mut t = AttendanceTracker::new(ledger, TrackerConfig::default(), day("2024-01-10"));

        let err = t.on_recognition(&seen("Bob", "2024-01-10 08:00:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::LedgerUnavailable(_)));
        assert!(!t.is_checked_in("Bob"));

        t.ledger().set_down(false);
        let outcome = t.on_recognition(&seen("Bob", "2024-01-10 08:00:03")).unwrap();
        assert_eq!(outcome, Outcome::Suppressed { name: "Bob".into() });

        let outcome = t.on_recognition(&seen("Bob", "2024-01-10 08:00:05")).unwrap();
        assert!(matches!(outcome, Outcome::CheckedIn(_)));
    }

    #[test]
    fn test_ledger_conflict_resyncs_cache() {
        let ledger = MemoryLedger::new(1);
        let mut t = tracker(ledger, "2024-01-10");
        // Manual check-in from another process, invisible to the cache.
        t.ledger().insert_raw("Jane Doe", at("2024-01-10 08:30:00"));

        let err = t.on_recognition(&seen("Jane Doe", "2024-01-10 08:45:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyCheckedIn { .. }));
        assert!(t.is_checked_in("Jane Doe"));
        assert_eq!(t.ledger().len(), 1);

        let outcome = t.on_recognition(&seen("Jane Doe", "2024-01-10 10:00:00")).unwrap();
        assert!(matches!(outcome, Outcome::AlreadyCheckedIn { .. }));
    }

    #[test]
    fn test_manual_and_automatic_share_ledger_guard() {
        let mut t = tracker(MemoryLedger::new(1), "2024-01-10");
        t.handle(AttendanceRequest::ManualCheckIn {
            name: "Jane Doe".into(),
            at: at("2024-01-10 08:45:00"),
        })
        .unwrap();
        let outcome = t
            .handle(AttendanceRequest::Recognized(seen("Jane Doe", "2024-01-10 08:46:00")))
            .unwrap();
        assert!(matches!(outcome, Outcome::AlreadyCheckedIn { .. }));

        let err = t
            .handle(AttendanceRequest::ManualCheckIn {
                name: "Jane Doe".into(),
                at: at("2024-01-10 09:00:00"),
            })
            .unwrap_err();
        assert!(matches!(err, AttendanceError::AlreadyCheckedIn { .. }));
        assert_eq!(t.ledger().writes(), 1);
    }

    #[test]
    fn test_manual_check_out_scenario() {
        let mut t = tracker(MemoryLedger::new(1), "2024-01-10");
        t.check_in("Jane Doe", at("2024-01-10 08:45:00")).unwrap();
        let outcome = t
            .handle(AttendanceRequest::ManualCheckOut {
                name: "Jane Doe".into(),
                at: at("2024-01-10 17:45:00"),
            })
            .unwrap();
        let Outcome::CheckedOut(record) = outcome else {
            panic!("expected check-out");
        };
        assert_eq!(record.total_hours, Some(9.0));
        assert!(t.is_checked_in("Jane Doe"));
    }

    #[test]
    fn test_manual_check_out_without_check_in() {
        let mut t = tracker(MemoryLedger::new(1), "2024-01-10");
        let err = t.check_out("Bob", at("2024-01-10 17:00:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::NoOpenRecord { .. }));
    }

    #[test]
    fn test_failed_write_leaves_cache_untouched() {
        let ledger = MemoryLedger::new(1);
        let mut t = tracker(ledger, "2024-01-10");
        t.ledger().set_down(true);
        let err = t.check_in("Bob", at("2024-01-10 08:00:00")).unwrap_err();
        assert!(matches!(err, AttendanceError::LedgerUnavailable(_)));
        assert_eq!(t.checked_in_count(), 0);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let ledger = MemoryLedger::new(3);
        ledger.insert_raw("Jane Doe", at("2024-01-10 08:00:00"));
        ledger.insert_raw("Bob", at("2024-01-10 08:10:00"));
        let mut t = AttendanceTracker::new(ledger, TrackerConfig::default(), day("2024-01-10"));
        assert_eq!(t.reconcile().unwrap(), 2);
        assert_eq!(t.reconcile().unwrap(), 2);
        assert!(t.is_checked_in("Jane Doe") && t.is_checked_in("bob"));
    }

    #[test]
    fn test_failed_reconcile_keeps_previous_cache() {
        let ledger = MemoryLedger::new(1);
        ledger.insert_raw("Jane Doe", at("2024-01-10 08:00:00"));
        let mut t = tracker(ledger, "2024-01-10");
        t.ledger().set_down(true);
        assert!(t.reconcile().is_err());
        assert!(t.is_stale());
        assert!(t.is_checked_in("Jane Doe"));
    }

    #[test]
    fn test_roll_over_clears_and_reconciles() {
        let ledger = MemoryLedger::new(2);
        let mut t = tracker(ledger, "2024-01-10");
        t.on_recognition(&seen("Jane Doe", "2024-01-10 08:00:00")).unwrap();
        t.ledger().insert_raw("Bob", at("2024-01-11 07:00:00"));

        assert_eq!(t.roll_over(day("2024-01-10")).unwrap(), RolloverOutcome::Unchanged);
        let outcome = t.roll_over(day("2024-01-11")).unwrap();
        assert_eq!(
            outcome,
            RolloverOutcome::Advanced {
                from: day("2024-01-10"),
                to: day("2024-01-11"),
                checked_in: 1
            }
        );
        assert!(!t.is_checked_in("Jane Doe"));
        assert!(t.is_checked_in("Bob"));

        let outcome = t.on_recognition(&seen("Jane Doe", "2024-01-11 08:00:00")).unwrap();
        assert!(matches!(outcome, Outcome::CheckedIn(_)));
    }

    #[test]
    fn test_roll_over_retries_stale_cache() {
        let ledger = MemoryLedger::new(1);
        let mut t = tracker(ledger, "2024-01-10");
        t.ledger().set_down(true);
        assert!(t.roll_over(day("2024-01-11")).is_err());
        assert!(t.is_stale());
        assert_eq!(t.day(), day("2024-01-11"));

        t.ledger().set_down(false);
        assert_eq!(
            t.roll_over(day("2024-01-11")).unwrap(),
            RolloverOutcome::Refreshed { checked_in: 0 }
        );
        assert!(!t.is_stale());
    }

    #[test]
    fn test_event_from_new_day_rolls_over_first() {
        let mut t = tracker(MemoryLedger::new(1), "2024-01-10");
        t.on_recognition(&seen("Jane Doe", "2024-01-10 08:00:00")).unwrap();
        let outcome = t.on_recognition(&seen("Jane Doe", "2024-01-11 08:00:00")).unwrap();
        assert!(matches!(outcome, Outcome::CheckedIn(_)));
        assert_eq!(t.day(), day("2024-01-11"));
        assert_eq!(t.ledger().writes(), 2);
    }

    #[test]
    fn test_event_from_previous_day_suppressed() {
        let mut t = tracker(MemoryLedger::new(1), "2024-01-11");
        let outcome = t.on_recognition(&seen("Jane Doe", "2024-01-10 23:59:59")).unwrap();
        assert!(matches!(outcome, Outcome::Suppressed { .. }));
        assert_eq!(t.ledger().writes(), 0);
    }

    #[test]
    fn test_outcome_messages() {
        let outcome = Outcome::AlreadyCheckedIn { name: "Jane Doe".into() };
        assert_eq!(outcome.to_string(), "Jane Doe already checked in today");
    }

    proptest! {
        /// However densely one identity is seen inside a single cooldown
        /// window, at most one ledger write happens.
        #[test]
        fn prop_one_write_per_cooldown_window(
            offsets in proptest::collection::vec(0u32..5_000, 1..40),
            ledger_down_first in any::<bool>(),
        ) {
            let ledger = MemoryLedger::new(1);
            ledger.set_down(ledger_down_first);
            let mut t = AttendanceTracker::new(ledger, TrackerConfig::default(), day("2024-01-10"));
            let base = at("2024-01-10 08:00:00");
            let mut sorted = offsets.clone();
            sorted.sort_unstable();
            for (i, ms) in sorted.iter().enumerate() {
                if i == 1 {
                    t.ledger().set_down(false);
                }
                let event = RecognitionEvent {
                    identity: "Jane Doe".into(),
                    confidence: 50.0,
                    at: base + TimeDelta::milliseconds(i64::from(*ms)),
                };
                let _ = t.on_recognition(&event);
            }
            prop_assert!(t.ledger().writes() <= 1);
        }

        #[test]
        fn prop_reconcile_idempotent(names in proptest::collection::hash_set("[a-e]{1,3}", 0..8), runs in 1usize..4) {
            let ledger = MemoryLedger::new(8);
            for name in &names {
                ledger.insert_raw(name, at("2024-01-10 08:00:00"));
            }
            let mut t = AttendanceTracker::new(ledger, TrackerConfig::default(), day("2024-01-10"));
            let first = t.reconcile().unwrap();
            for _ in 0..runs {
                prop_assert_eq!(t.reconcile().unwrap(), first);
            }
            for name in &names {
                prop_assert!(t.is_checked_in(name));
            }
        }
    }
}
