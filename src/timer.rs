//! Wall-clock stopwatch with whole-second resolution.
//!
//! Sub-second latencies read as zero. That is accepted for a probe whose
//! interesting failures are hangs and corrupt data, not microseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch. A clock set before 1970 reads as 0.
fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Measures elapsed seconds between a start point and `stop()`.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: u64,
    end: u64,
}

impl Timer {
    /// Start a timer at the current time.
    pub fn start() -> Self {
        Self::starting_at(now_secs())
    }

    fn starting_at(start: u64) -> Self {
        Timer { start, end: start }
    }

    /// Capture the end time and return seconds elapsed since start.
    pub fn stop(&mut self) -> u64 {
        self.stop_at(now_secs())
    }

    fn stop_at(&mut self, end: u64) -> u64 {
        self.end = end;
        self.elapsed()
    }

    /// Restart the measurement from now.
    pub fn reset(&mut self) {
        *self = Self::start();
    }

    /// Seconds between start and the last `stop()`. Never negative, even if
    /// the wall clock stepped backwards in between.
    pub fn elapsed(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
