//! Enrollment capture throttle.
//!
//! While an employee is being enrolled, the vision process sees a face on
//! every frame. Only some of those crops should be stored as training
//! samples: at most one per capture interval, up to a fixed count. This is
//! unrelated to the recognition cooldown.
//!
//! A session ends once its label has gone unasked for `idle_reset`, or when
//! the day rolls over, so the same label can be enrolled again later.

use std::time::{Duration, Instant};

pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_CAPTURES: u32 = 30;
pub const DEFAULT_IDLE_RESET: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub interval: Duration,
    pub max_captures: u32,
    /// Quiet period after which a label's session is forgotten.
    pub idle_reset: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CAPTURE_INTERVAL,
            max_captures: DEFAULT_MAX_CAPTURES,
            idle_reset: DEFAULT_IDLE_RESET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDecision {
    /// Store this capture as sample number `index` (1-based).
    Admit { index: u32 },
    TooSoon,
    /// The session already has `max_captures` samples.
    Complete,
}

/// Per-session gate deciding which captures are kept.
#[derive(Debug, Clone)]
pub struct CaptureThrottle {
    config: CaptureConfig,
    admitted: u32,
    last: Option<Instant>,
    /// Last request of any outcome.
    touched: Option<Instant>,
}

impl CaptureThrottle {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            admitted: 0,
            last: None,
            touched: None,
        }
    }

    pub fn admitted(&self) -> u32 {
        self.admitted
    }

    pub fn is_complete(&self) -> bool {
        self.admitted >= self.config.max_captures
    }

    /// True once no capture has been asked for during `idle_reset`.
    pub fn is_idle(&self, now: Instant) -> bool {
        self.touched
            .map_or(true, |t| now.saturating_duration_since(t) >= self.config.idle_reset)
    }

    pub fn admit(&mut self, now: Instant) -> CaptureDecision {
        self.touched = Some(now);
        if self.is_complete() {
            return CaptureDecision::Complete;
        }
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.config.interval {
                return CaptureDecision::TooSoon;
            }
        }
        self.last = Some(now);
        self.admitted += 1;
        CaptureDecision::Admit {
            index: self.admitted,
        }
    }
}
