//! Reconnection Policy
//!
//! Exponential backoff with jitter for stream reconnection. Every delay is
//! capped at `max_delay` after jitter is applied, and the policy gives up
//! after `max_attempts` consecutive failures.

use std::num::NonZeroU32;
use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay, jitter included.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: NonZeroU32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
        }
    }
}

/// Backoff state for one connection.
///
/// ```rust
/// use ticker_stream::application::services::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert!(policy.next_delay().is_some());
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy in its initial state.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Record a failed attempt and return the delay before the next one.
    ///
    /// Returns `None` once `max_attempts` consecutive failures are recorded.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt_count = self.attempt_count.saturating_add(1);
        if !self.should_retry() {
            return None;
        }

        let delay = self.apply_jitter(self.current_delay).min(self.config.max_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Return to the initial delay after a healthy connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts.get()
    }

    /// Whether the failures so far leave room for another attempt.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.attempt_count < self.config.max_attempts.get()
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted_millis as u64)
    }
}

/// Terminal reconnection failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Consecutive failure budget spent.
    #[error("gave up after {attempts} consecutive failed attempts, last error: {last_error}")]
    MaxAttemptsExceeded {
        /// Failed attempts.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64, multiplier: f64, jitter: f64, attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: jitter,
            max_attempts: NonZeroU32::new(attempts).unwrap(),
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts.get(), 10);
    }

    #[test]
    fn delays_double() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 2.0, 0.0, 10));
        let delays: Vec<_> = (0..4).filter_map(|_| policy.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn delays_are_capped() {
        let mut policy = ReconnectPolicy::new(config(1000, 2000, 4.0, 0.0, 10));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let mut policy = ReconnectPolicy::new(config(1000, 1000, 2.0, 0.5, 200));
        while let Some(delay) = policy.next_delay() {
            assert!(delay <= Duration::from_secs(1), "{delay:?} above cap");
        }
        assert_eq!(policy.attempt_count(), 200);
        assert!(!policy.should_retry());
    }

    #[test]
    fn jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(config(1000, 10_000, 2.0, 0.1, 2));
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn gives_up_on_the_configured_failure() {
        let mut policy = ReconnectPolicy::new(config(100, 1000, 2.0, 0.0, 3));
        for expected in 1..3 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.attempt_count(), expected);
        }
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 3);
        assert!(!policy.should_retry());
    }

    #[test]
    fn single_attempt_budget_never_retries() {
        let mut policy = ReconnectPolicy::new(config(100, 1000, 2.0, 0.0, 1));
        assert!(policy.should_retry());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 1);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 2.0, 0.0, 3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }
}
