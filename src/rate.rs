//! Acquisition pacing.
//!
//! Each acquire-and-enqueue cycle is followed by a sleep of
//! `max(0, interval - cycle_duration)`. Overruns are not compensated in later
//! cycles.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimiter {
    interval: Option<Duration>,
}

impl RateLimiter {
    /// `fps == 0` disables pacing.
    pub fn from_fps(fps: u32) -> Self {
        if fps == 0 {
            return Self::unlimited();
        }
        Self {
            interval: Some(Duration::from_secs_f64(1.0 / fps as f64)),
        }
    }

    pub fn unlimited() -> Self {
        Self { interval: None }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Time still to wait after a cycle that took `elapsed`.
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.interval
            .map(|interval| interval.saturating_sub(elapsed))
            .unwrap_or(Duration::ZERO)
    }

    /// Sleep out the rest of the cycle that started at `cycle_started`.
    pub fn pace(&self, cycle_started: Instant) {
        let wait = self.remaining(cycle_started.elapsed());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}
