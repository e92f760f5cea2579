//! Delays between retries of transient ledger reads

use std::time::Duration;

use crate::config::BackoffConfig;

/// The waits of one bounded retry sequence.
///
/// Yields one delay per retry the budget allows, so `max_attempts` tries
/// produce `max_attempts - 1` delays. Each delay grows by `multiplier` up to
/// `max` and is stretched by up to `jitter` of itself.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    base: Duration,
    cap: Duration,
    multiplier: f64,
    jitter: f64,
    retries_left: u32,
}

impl RetrySchedule {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base: config.initial,
            cap: config.max,
            multiplier: config.multiplier,
            jitter: config.jitter,
            retries_left: config.max_attempts.saturating_sub(1),
        }
    }

    /// Retries still available.
    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }
}

impl Iterator for RetrySchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;

        let delay = self.base;
        self.base = delay.mul_f64(self.multiplier).min(self.cap);
        Some(delay + delay.mul_f64(self.jitter * rand::random::<f64>()))
    }
}
