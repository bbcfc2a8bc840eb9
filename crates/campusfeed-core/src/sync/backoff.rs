//! Exponential reconnection backoff with jitter

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Delay before retry number `attempt` (1-based)
///
/// `initial * multiplier^(attempt-1)`, capped at `max_delay`, then reduced
/// by up to `jitter` of itself using `unit` (a value in `0.0..1.0`). The
/// result never exceeds the cap.
pub fn delay_for_attempt(config: &BackoffConfig, attempt: u32, unit: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = config.initial_delay.as_secs_f64() * config.multiplier.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());
    let shave = capped * config.jitter * unit.clamp(0.0, 1.0);
    Duration::from_secs_f64((capped - shave).max(0.0))
}

/// Tracks consecutive failures for one reconnection loop
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive failures recorded so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return the delay before the next try
    ///
    /// Returns `None` once `max_attempts` is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_attempts
            .is_some_and(|max| self.attempt >= max)
        {
            return None;
        }
        self.attempt += 1;
        let unit: f64 = rand::rng().random();
        Some(delay_for_attempt(&self.config, self.attempt, unit))
    }

    /// Forget past failures after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
