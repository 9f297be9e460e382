//! # Progress — Per-Run Search Counters
//!
//! Counters shared between a running search engine and anything that wants a
//! live view of it. `tested` is an atomic so readers never contend with the
//! hot loop; the current-candidate string sits behind a Mutex that is only
//! touched once per reporting block, not per candidate.
//!
//! ## Derived Values
//!
//! - **rate**: candidates per second since the run started (0 when no time
//!   has elapsed yet).
//! - **percent**: `tested * 100 / keyspace`, capped at 99. Only a terminal
//!   COMPLETED transition reports 100.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

/// Highest percentage a non-terminal report may carry.
pub const MAX_RUNNING_PERCENT: u8 = 99;

pub struct Progress {
    pub tested: AtomicU64,
    pub current: Mutex<String>,
    start: Instant,
}

impl Progress {
    pub fn new() -> Arc<Self> {
        Arc::new(Progress {
            tested: AtomicU64::new(0),
            current: Mutex::new(String::new()),
            start: Instant::now(),
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn set_current(&self, candidate: &str) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.clear();
        current.push_str(candidate);
    }

    pub fn current(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Candidates per second since the run started.
    pub fn rate(&self) -> u64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            (self.tested.load(Ordering::Relaxed) as f64 / secs) as u64
        } else {
            0
        }
    }

    /// Share of `keyspace` examined so far, capped at [`MAX_RUNNING_PERCENT`].
    pub fn percent_of(&self, keyspace: u128) -> u8 {
        running_percent(self.tested.load(Ordering::Relaxed), keyspace)
    }

    pub fn log_status(&self, task_id: &str) {
        info!(
            task_id,
            current = %self.current(),
            tested = self.tested.load(Ordering::Relaxed),
            rate = self.rate(),
            elapsed = %format_hms(self.elapsed()),
            "search progress"
        );
    }
}

/// `tested * 100 / keyspace`, floored and capped at 99.
pub fn running_percent(tested: u64, keyspace: u128) -> u8 {
    if keyspace == 0 {
        return 0;
    }
    let pct = (tested as u128).saturating_mul(100) / keyspace;
    pct.min(MAX_RUNNING_PERCENT as u128) as u8
}

/// Render a duration as `HH:MM:SS`.
pub fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}
