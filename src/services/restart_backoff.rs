//! Restart delay policy for crashed analyzers
//!
//! The delay for attempt `n` is `base × 2^n`, clamped to `max`, plus up to 10%
//! jitter derived from the system clock so that feeds sharing a failing
//! interface do not respawn in lockstep.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const JITTER_PERCENT: u64 = 10;

#[derive(Debug, Clone)]
pub struct RestartBackoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl RestartBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next respawn, advancing the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay + generate_jitter(delay)
    }

    /// Un-jittered delay for a given attempt
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Forget previous failures after a run that produced data
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Pseudo-random jitter of up to 10% of `delay`
fn generate_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = delay.as_millis() as u64 * JITTER_PERCENT / 100;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    Duration::from_millis((nanos % (max_jitter_ms as u128 + 1)) as u64)
}
