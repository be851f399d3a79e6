use crate::engine::{EngineError, EngineHandle};
use crate::feed::RecognitionFlag;
use chrono::{Local, NaiveDate};
use rollcall_core::capture::CaptureDecision;
use rollcall_core::types::DATE_FORMAT;
use rollcall_core::AttendanceError;
use std::sync::atomic::Ordering;
use zbus::interface;

/// D-Bus interface for the operator surface of the kiosk.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
    recognition: RecognitionFlag,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, recognition: RecognitionFlag) -> Self {
        Self { engine, recognition }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Check `name` in now. Returns a confirmation message.
    async fn check_in(&self, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "check-in requested");
        let record = self
            .engine
            .check_in(name, Local::now().naive_local())
            .await
            .map_err(to_fdo)?;
        let time = record.check_in.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default();
        Ok(format!("{} checked in at {time}", record.name))
    }

    /// Check `name` out now. Returns a confirmation with the hours worked.
    async fn check_out(&self, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "check-out requested");
        let record = self
            .engine
            .check_out(name, Local::now().naive_local())
            .await
            .map_err(to_fdo)?;
        Ok(format!(
            "{} checked out (total hours: {:.2})",
            record.name,
            record.total_hours.unwrap_or(0.0)
        ))
    }

    /// Daily summary as JSON. An empty `date` means today.
    async fn summary(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = parse_date(date)?;
        let summary = self.engine.summary(date).await.map_err(to_fdo)?;
        serde_json::to_string(&summary).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "day": status.day.format(DATE_FORMAT).to_string(),
            "checked_in": status.checked_in,
            "stale": status.stale,
            "recognition": self.recognition.load(Ordering::Relaxed),
            "enrollments": status.enrollments,
        })
        .to_string())
    }

    /// Whether the vision process should store its current enrollment
    /// capture for `label`. Returns the 1-based sample index, or 0 to
    /// discard the capture. Fails once the session is complete.
    async fn admit_capture(&self, label: &str) -> zbus::fdo::Result<u32> {
        match self.engine.admit_capture(label).await.map_err(to_fdo)? {
            CaptureDecision::Admit { index } => Ok(index),
            CaptureDecision::TooSoon => Ok(0),
            CaptureDecision::Complete => Err(zbus::fdo::Error::LimitsExceeded(format!(
                "enrollment for {label} already complete"
            ))),
        }
    }
}

fn parse_date(raw: &str) -> zbus::fdo::Result<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Local::now().date_naive());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad date {raw:?}: {e}")))
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Attendance(AttendanceError::InvalidInput(msg)) => zbus::fdo::Error::InvalidArgs(msg),
        EngineError::Timeout(_) | EngineError::Busy => zbus::fdo::Error::TimedOut(err.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::feed;
    use rollcall_core::capture::CaptureConfig;
    use rollcall_core::oracle::LabelMap;
    use rollcall_core::{AttendanceTracker, TrackerConfig};
    use rollcall_store::SqliteLedger;
    use std::io::Write;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_status_reports_recognition_off_after_feed_ends() {
        let today = Local::now().date_naive();
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let mut tracker = AttendanceTracker::new(ledger, TrackerConfig::default(), today);
        tracker.reconcile().unwrap();
        let engine = spawn_engine(tracker, CaptureConfig::default(), Duration::from_secs(2)).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"label\": 1, \"distance\": 30}}").unwrap();
        let mut labels = LabelMap::default();
        labels.insert(1, "Jane Doe");

        let live = Arc::new(AtomicBool::new(false));
        let service = AttendanceService::new(engine.clone(), live.clone());
        let path = file.path().to_str().unwrap().to_string();
        let handle = feed::spawn(path, labels, 100.0, engine.clone(), live.clone()).unwrap();
        tokio::task::spawn_blocking(move || handle.join().unwrap())
            .await
            .unwrap();

        assert!(!live.load(Ordering::Relaxed));
        let status: serde_json::Value = serde_json::from_str(&service.status().await.unwrap()).unwrap();
        assert_eq!(status["recognition"], false);
        assert_eq!(status["checked_in"], 1);

        let summary: serde_json::Value = serde_json::from_str(&service.summary("").await.unwrap()).unwrap();
        assert_eq!(summary["present_employees"], 1);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date(" 2024-01-10 ").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
        );
        assert_eq!(parse_date("").unwrap(), Local::now().date_naive());
        assert!(matches!(parse_date("10/01/2024"), Err(zbus::fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_refusal_message_passes_through() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let err = to_fdo(EngineError::Attendance(AttendanceError::AlreadyCheckedIn {
            name: "Jane Doe".into(),
            date,
        }));
        match err {
            zbus::fdo::Error::Failed(msg) => assert_eq!(msg, "Jane Doe already checked in on 2024-01-10"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_timeout_maps_to_timed_out() {
        let err = to_fdo(EngineError::Timeout(std::time::Duration::from_secs(2)));
        assert!(matches!(err, zbus::fdo::Error::TimedOut(_)));
    }
}
