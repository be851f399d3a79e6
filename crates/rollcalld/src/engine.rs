use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::capture::{CaptureConfig, CaptureDecision, CaptureThrottle};
use rollcall_core::rollover::RolloverOutcome;
use rollcall_core::{
    AttendanceError, AttendanceRecord, AttendanceRequest, AttendanceTracker, DailySummary, Ledger, Outcome,
    RecognitionEvent,
};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Recognition events can arrive many times a second; anything beyond this
/// backlog is dropped rather than queued.
const QUEUE_DEPTH: usize = 32;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("engine queue full; event dropped")]
    Busy,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Snapshot of the engine's attendance cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub day: NaiveDate,
    pub checked_in: usize,
    pub stale: bool,
    pub enrollments: usize,
}

type Reply<T> = oneshot::Sender<Result<T, AttendanceError>>;

/// Messages sent from the D-Bus handlers, the feed and the rollover task to
/// the engine thread.
enum EngineRequest {
    Recognized(RecognitionEvent),
    CheckIn {
        name: String,
        at: NaiveDateTime,
        reply: Reply<AttendanceRecord>,
    },
    CheckOut {
        name: String,
        at: NaiveDateTime,
        reply: Reply<AttendanceRecord>,
    },
    Summary {
        date: NaiveDate,
        reply: Reply<DailySummary>,
    },
    Rollover {
        today: NaiveDate,
        reply: Reply<RolloverOutcome>,
    },
    AdmitCapture {
        label: String,
        reply: oneshot::Sender<CaptureDecision>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Send a request and wait, at most `timeout`, for its reply.
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(make(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }

    /// True once the engine thread has stopped taking requests.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a recognition event without waiting for the outcome.
    pub fn submit(&self, event: RecognitionEvent) -> Result<(), EngineError> {
        self.tx.try_send(EngineRequest::Recognized(event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EngineError::Busy,
            mpsc::error::TrySendError::Closed(_) => EngineError::ChannelClosed,
        })
    }

    pub async fn check_in(&self, name: &str, at: NaiveDateTime) -> Result<AttendanceRecord, EngineError> {
        let name = name.to_string();
        Ok(self.call(|reply| EngineRequest::CheckIn { name, at, reply }).await??)
    }

    pub async fn check_out(&self, name: &str, at: NaiveDateTime) -> Result<AttendanceRecord, EngineError> {
        let name = name.to_string();
        Ok(self.call(|reply| EngineRequest::CheckOut { name, at, reply }).await??)
    }

    pub async fn summary(&self, date: NaiveDate) -> Result<DailySummary, EngineError> {
        Ok(self.call(|reply| EngineRequest::Summary { date, reply }).await??)
    }

    pub async fn roll_over(&self, today: NaiveDate) -> Result<RolloverOutcome, EngineError> {
        Ok(self.call(|reply| EngineRequest::Rollover { today, reply }).await??)
    }

    /// Ask whether an enrollment capture for `label` should be stored now.
    pub async fn admit_capture(&self, label: &str) -> Result<CaptureDecision, EngineError> {
        let label = label.to_string();
        self.call(|reply| EngineRequest::AdmitCapture { label, reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    /// Stop the engine loop and wait for it to drop the ledger.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Shutdown { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread. The thread owns the tracker
/// (and through it the ledger connection), so every attendance mutation in
/// this process is serialized.
pub fn spawn_engine<L>(
    tracker: AttendanceTracker<L>,
    capture: CaptureConfig,
    timeout: Duration,
) -> Result<EngineHandle, EngineError>
where
    L: Ledger + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineRequest>(QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || run(tracker, capture, rx))
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout })
}

fn run<L: Ledger>(mut tracker: AttendanceTracker<L>, capture: CaptureConfig, mut rx: mpsc::Receiver<EngineRequest>) {
    tracing::info!(day = %tracker.day(), "engine thread started");
    // Enrollment sessions never outlive the day they started on.
    let mut enrollments: HashMap<String, CaptureThrottle> = HashMap::new();
    let mut enrollment_day = tracker.day();

    while let Some(req) = rx.blocking_recv() {
        if tracker.day() != enrollment_day {
            if !enrollments.is_empty() {
                tracing::debug!(sessions = enrollments.len(), "enrollment sessions cleared for new day");
                enrollments.clear();
            }
            enrollment_day = tracker.day();
        }
        match req {
            EngineRequest::Recognized(event) => {
                match tracker.handle(AttendanceRequest::Recognized(event)) {
                    Ok(Outcome::CheckedIn(record)) => tracing::info!(name = %record.name, "recognized and checked in"),
                    Ok(outcome) => tracing::trace!(%outcome, "recognition"),
                    Err(e) if e.is_refusal() => tracing::info!(error = %e, "recognition refused by ledger"),
                    Err(e) => tracing::error!(error = %e, "recognition check-in failed"),
                }
            }
            EngineRequest::CheckIn { name, at, reply } => {
                let _ = reply.send(tracker.check_in(&name, at));
            }
            EngineRequest::CheckOut { name, at, reply } => {
                let _ = reply.send(tracker.check_out(&name, at));
            }
            EngineRequest::Summary { date, reply } => {
                let _ = reply.send(tracker.summary(date));
            }
            EngineRequest::Rollover { today, reply } => {
                let _ = reply.send(tracker.roll_over(today));
            }
            EngineRequest::AdmitCapture { label, reply } => {
                let now = Instant::now();
                enrollments.retain(|_, throttle| !throttle.is_idle(now));
                let throttle = enrollments
                    .entry(label.clone())
                    .or_insert_with(|| CaptureThrottle::new(capture));
                let decision = throttle.admit(now);
                if let CaptureDecision::Admit { index } = decision {
                    tracing::debug!(label, index, "enrollment capture admitted");
                }
                let _ = reply.send(decision);
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(EngineStatus {
                    day: tracker.day(),
                    checked_in: tracker.checked_in_count(),
                    stale: tracker.is_stale(),
                    enrollments: enrollments.len(),
                });
            }
            EngineRequest::Shutdown { reply } => {
                rx.close();
                drop(tracker);
                tracing::info!("engine thread exiting");
                let _ = reply.send(());
                return;
            }
        }
    }
    tracing::info!("engine thread exiting; all handles dropped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::types::{DATE_FORMAT, TIMESTAMP_FORMAT};
    use rollcall_core::TrackerConfig;
    use rollcall_store::SqliteLedger;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn engine() -> EngineHandle {
        engine_with_capture(CaptureConfig::default())
    }

    #[tokio::test]
    async fn test_manual_check_in_and_out() {
        let engine = engine();
        engine.check_in("Jane Doe", at("2024-01-10 08:45:00")).await.unwrap();
        let record = engine.check_out("Jane Doe", at("2024-01-10 17:45:00")).await.unwrap();
        assert_eq!(record.total_hours, Some(9.0));

        let err = engine.check_in("jane doe", at("2024-01-10 18:00:00")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Attendance(AttendanceError::AlreadyCheckedIn { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_out_without_check_in() {
        let engine = engine();
        let err = engine.check_out("Bob", at("2024-01-10 17:00:00")).await.unwrap_err();
        assert!(matches!(err, EngineError::Attendance(AttendanceError::NoOpenRecord { .. })));
    }

    #[tokio::test]
    async fn test_recognition_checks_in_once() {
        let engine = engine();
        for secs in 0..3 {
            engine
                .submit(RecognitionEvent {
                    identity: "Jane Doe".into(),
                    confidence: 60.0,
                    at: at(&format!("2024-01-10 08:45:0{secs}")),
                })
                .unwrap();
        }
        // Requests are handled in order, so the status reply comes after all three events.
        let status = engine.status().await.unwrap();
        assert_eq!(status.checked_in, 1);
        assert!(!status.stale);

        let summary = engine.summary(day("2024-01-10")).await.unwrap();
        assert_eq!(summary.present_employees, 1);
    }

    #[tokio::test]
    async fn test_rollover_advances_day() {
        let engine = engine();
        engine.check_in("Bob", at("2024-01-10 09:00:00")).await.unwrap();
        let outcome = engine.roll_over(day("2024-01-11")).await.unwrap();
        assert_eq!(
            outcome,
            RolloverOutcome::Advanced {
                from: day("2024-01-10"),
                to: day("2024-01-11"),
                checked_in: 0,
            }
        );
        assert_eq!(engine.roll_over(day("2024-01-11")).await.unwrap(), RolloverOutcome::Unchanged);
        assert_eq!(engine.status().await.unwrap().day, day("2024-01-11"));
    }

    #[tokio::test]
    async fn test_admit_capture_throttles_per_label() {
        let engine = engine();
        assert_eq!(
            engine.admit_capture("Jane Doe").await.unwrap(),
            CaptureDecision::Admit { index: 1 }
        );
        assert_eq!(engine.admit_capture("Jane Doe").await.unwrap(), CaptureDecision::TooSoon);
        assert_eq!(
            engine.admit_capture("Bob").await.unwrap(),
            CaptureDecision::Admit { index: 1 }
        );
        assert_eq!(engine.status().await.unwrap().enrollments, 2);
    }

    fn engine_with_capture(capture: CaptureConfig) -> EngineHandle {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let mut tracker = AttendanceTracker::new(ledger, TrackerConfig::default(), day("2024-01-10"));
        tracker.reconcile().unwrap();
        spawn_engine(tracker, capture, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_enrollment_restarts_after_rollover() {
        let engine = engine_with_capture(CaptureConfig {
            interval: Duration::ZERO,
            max_captures: 2,
            ..CaptureConfig::default()
        });
        assert_eq!(engine.admit_capture("Élise").await.unwrap(), CaptureDecision::Admit { index: 1 });
        assert_eq!(engine.admit_capture("Élise").await.unwrap(), CaptureDecision::Admit { index: 2 });
        assert_eq!(engine.admit_capture("Élise").await.unwrap(), CaptureDecision::Complete);

        engine.roll_over(day("2024-01-11")).await.unwrap();
        assert_eq!(engine.status().await.unwrap().enrollments, 0);
        assert_eq!(engine.admit_capture("Élise").await.unwrap(), CaptureDecision::Admit { index: 1 });
    }

    #[tokio::test]
    async fn test_idle_enrollment_is_forgotten() {
        let engine = engine_with_capture(CaptureConfig {
            interval: Duration::ZERO,
            max_captures: 1,
            idle_reset: Duration::from_millis(50),
        });
        assert_eq!(engine.admit_capture("Bob").await.unwrap(), CaptureDecision::Admit { index: 1 });
        assert_eq!(engine.admit_capture("Bob").await.unwrap(), CaptureDecision::Complete);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(engine.admit_capture("Bob").await.unwrap(), CaptureDecision::Admit { index: 1 });
        assert_eq!(engine.status().await.unwrap().enrollments, 1);
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let engine = engine();
        engine.shutdown().await.unwrap();
        assert!(engine.is_closed());
        let err = engine.status().await.unwrap_err();
        assert!(matches!(err, EngineError::ChannelClosed));
        assert!(matches!(
            engine.submit(RecognitionEvent {
                identity: "Bob".into(),
                confidence: 50.0,
                at: at("2024-01-10 09:00:00"),
            }),
            Err(EngineError::ChannelClosed)
        ));
    }
}
