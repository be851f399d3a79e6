use rollcall_core::capture::{CaptureConfig, DEFAULT_CAPTURE_INTERVAL, DEFAULT_IDLE_RESET, DEFAULT_MAX_CAPTURES};
use rollcall_core::oracle::DEFAULT_DISTANCE_THRESHOLD;
use rollcall_core::tracker::DEFAULT_COOLDOWN;
use std::path::PathBuf;
use std::time::Duration;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Minimum gap between automatic check-in attempts per identity.
    pub cooldown: Duration,
    /// Minimum gap between stored enrollment captures.
    pub capture_interval: Duration,
    /// Captures per enrollment session.
    pub max_captures: u32,
    /// Quiet period after which an enrollment session is forgotten.
    pub capture_idle_reset: Duration,
    /// Oracle distance below which a prediction is a known identity.
    pub distance_threshold: f64,
    /// Upper bound on how long a caller waits for the engine (and SQLite's busy timeout).
    pub ledger_timeout: Duration,
    /// How often the rollover task checks the date.
    pub rollover_interval: Duration,
    /// Oracle prediction feed; `-` is stdin. Unset disables recognition.
    pub feed_path: Option<String>,
    /// Label id to name map for the oracle.
    pub labels_path: PathBuf,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(rollcall_store::default_db_path);

        let labels_path = var("ROLLCALL_LABELS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| db_path.with_file_name("labels.toml"));

        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            cooldown: parsed("ROLLCALL_COOLDOWN_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_COOLDOWN),
            capture_interval: parsed("ROLLCALL_CAPTURE_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CAPTURE_INTERVAL),
            max_captures: var("ROLLCALL_MAX_CAPTURES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_MAX_CAPTURES),
            capture_idle_reset: parsed("ROLLCALL_CAPTURE_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_IDLE_RESET),
            distance_threshold: var("ROLLCALL_DISTANCE_THRESHOLD")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_DISTANCE_THRESHOLD),
            ledger_timeout: Duration::from_millis(parsed("ROLLCALL_LEDGER_TIMEOUT_MS").unwrap_or(2000)),
            // A zero period would make tokio's interval panic.
            rollover_interval: Duration::from_secs(parsed("ROLLCALL_ROLLOVER_INTERVAL_SECS").unwrap_or(60).max(1)),
            feed_path: var("ROLLCALL_FEED_PATH").filter(|v| !v.trim().is_empty()),
            bus: match var("ROLLCALL_BUS").as_deref().map(str::trim) {
                Some("system") => BusKind::System,
                _ => BusKind::Session,
            },
            db_path,
            labels_path,
        }
    }

    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            interval: self.capture_interval,
            max_captures: self.max_captures,
            idle_reset: self.capture_idle_reset,
        }
    }
}
