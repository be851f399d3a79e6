//! Oracle prediction feed.
//!
//! The vision process writes one JSON object per detected face,
//! `{"label": 3, "distance": 41.2}`, to a file, FIFO or our stdin.
//!
//! A FIFO is reopened when its writer goes away, so restarting the vision
//! process does not disable recognition. Files and stdin are read once.

use crate::engine::{EngineError, EngineHandle};
use rollcall_core::oracle::{identify, IdentityOracle, LabelMap, Prediction};
use rollcall_core::AttendanceError;
use std::io::{BufRead, BufReader};
use std::os::unix::fs::FileTypeExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// True while a feed is open and being read.
pub type RecognitionFlag = Arc<AtomicBool>;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("cannot open feed {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("feed read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse {
        line: u64,
        source: serde_json::Error,
    },
}

impl From<FeedError> for AttendanceError {
    fn from(err: FeedError) -> Self {
        Self::OracleUnavailable(err.to_string())
    }
}

/// [`IdentityOracle`] reading JSON-lines predictions.
pub struct JsonLinesOracle<R> {
    reader: R,
    line: u64,
    buf: String,
}

impl<R: BufRead> JsonLinesOracle<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    fn read_prediction(&mut self) -> Result<Option<Prediction>, FeedError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;
            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str(text) {
                Ok(prediction) => return Ok(Some(prediction)),
                // One garbled line is not worth losing the feed over.
                Err(source) => {
                    let err = FeedError::Parse { line: self.line, source };
                    tracing::warn!(error = %err, "skipping unreadable prediction");
                }
            }
        }
    }
}

impl<R: BufRead> IdentityOracle for JsonLinesOracle<R> {
    fn next_prediction(&mut self) -> Result<Option<Prediction>, AttendanceError> {
        Ok(self.read_prediction()?)
    }
}

/// Open the feed at `path`; `-` means stdin.
pub fn open(path: &str) -> Result<JsonLinesOracle<Box<dyn BufRead + Send>>, FeedError> {
    let reader: Box<dyn BufRead + Send> = if path == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(path).map_err(|source| FeedError::Open {
            path: path.to_string(),
            source,
        })?;
        Box::new(BufReader::new(file))
    };
    Ok(JsonLinesOracle::new(reader))
}

/// Whether the feed at `path` is worth opening again after it ends.
fn reopens(path: &str) -> bool {
    path != "-"
        && std::fs::metadata(path)
            .map(|m| m.file_type().is_fifo())
            .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpReport {
    pub submitted: u64,
    /// The engine refused an event because it has shut down.
    pub engine_stopped: bool,
}

/// Forward known identities from `oracle` to the engine until the oracle
/// ends or the engine goes away.
pub fn pump<O: IdentityOracle>(
    oracle: &mut O,
    labels: &LabelMap,
    threshold: f64,
    engine: &EngineHandle,
    clock: impl Fn() -> chrono::NaiveDateTime,
) -> Result<PumpReport, AttendanceError> {
    let mut report = PumpReport::default();
    while let Some(prediction) = oracle.next_prediction()? {
        let Some(event) = identify(&prediction, labels, threshold).into_event(clock()) else {
            tracing::trace!(label = prediction.label, distance = prediction.distance, "unknown face");
            continue;
        };
        match engine.submit(event) {
            Ok(()) => report.submitted += 1,
            Err(EngineError::Busy) => tracing::warn!(label = prediction.label, "engine busy; recognition dropped"),
            Err(_) => {
                tracing::info!("engine stopped; feed closing");
                report.engine_stopped = true;
                break;
            }
        }
    }
    Ok(report)
}

/// Read the feed at `path` on its own thread with the local wall clock.
///
/// `live` is raised while the feed is open. A FIFO is reopened with
/// exponential backoff whenever it ends or fails; anything else ends the
/// thread and leaves `live` lowered.
pub fn spawn(
    path: String,
    labels: LabelMap,
    threshold: f64,
    engine: EngineHandle,
    live: RecognitionFlag,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("rollcall-feed".into())
        .spawn(move || {
            let now = || chrono::Local::now().naive_local();
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match open(&path) {
                    Ok(mut oracle) => {
                        backoff = INITIAL_BACKOFF;
                        live.store(true, Ordering::Relaxed);
                        tracing::info!(feed = %path, "recognition feed open");
                        let result = pump(&mut oracle, &labels, threshold, &engine, now);
                        live.store(false, Ordering::Relaxed);
                        match result {
                            Ok(report) if report.engine_stopped => return,
                            Ok(report) => tracing::info!(submitted = report.submitted, "oracle feed ended"),
                            Err(e) => tracing::error!(error = %e, "oracle feed failed"),
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "oracle feed unavailable"),
                }

                if engine.is_closed() {
                    return;
                }
                if !reopens(&path) {
                    tracing::warn!(feed = %path, "recognition disabled; manual check-in still available");
                    return;
                }
                tracing::info!(?backoff, "reopening recognition feed");
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        })
}
