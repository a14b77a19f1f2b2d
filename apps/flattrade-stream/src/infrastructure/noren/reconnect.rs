//! Reconnection Policy
//!
//! Backoff schedule for ticker reconnection:
//!
//! - Attempts `1..=linear_attempts` wait exactly the base interval.
//! - Later attempts wait `min(max_delay, base * growth^attempt)` plus a
//!   uniform jitter in `[0, max_jitter]`.
//! - The policy flips between normal and aggressive mode every
//!   `mode_toggle_cycles` attempts. In aggressive mode the delay collapses to
//!   `aggressive_floor`.
//! - A forced reconnect restarts at attempt 1 in aggressive mode.
//!
//! Once `max_attempts` attempts have been spent, `next_delay` returns `None`
//! and the ticker reports exhaustion.

use std::time::Duration;

use rand::Rng;

use crate::domain::streaming::ReconnectMode;

/// Smallest base interval accepted at runtime.
pub const MIN_BASE_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay for the first attempts and the base of exponential growth.
    pub base_interval: Duration,
    /// Upper bound on the backoff before jitter.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub growth_factor: f64,
    /// Upper bound of the uniform jitter added after the linear phase.
    pub max_jitter: Duration,
    /// Attempts that use the base interval unchanged.
    pub linear_attempts: u32,
    /// Attempts allowed before exhaustion (0 = unlimited).
    pub max_attempts: u32,
    /// Delay used while aggressive.
    pub aggressive_floor: Duration,
    /// Attempts between mode flips (0 = never flip).
    pub mode_toggle_cycles: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            growth_factor: 1.5,
            max_jitter: Duration::from_millis(1000),
            linear_attempts: 3,
            max_attempts: 50,
            aggressive_floor: Duration::from_millis(500),
            mode_toggle_cycles: 10,
        }
    }
}

/// Reconnection policy implementing the schedule above.
///
/// # Example
///
/// ```rust
/// use flattrade_stream::infrastructure::noren::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// // First attempts use the base interval.
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
    cycles_in_mode: u32,
    mode: ReconnectMode,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
            cycles_in_mode: 0,
            mode: ReconnectMode::Normal,
        }
    }

    /// Count the next attempt and return how long to wait before it.
    ///
    /// Returns `None` once the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;

        let delay = match self.mode {
            ReconnectMode::Aggressive => self.config.aggressive_floor,
            ReconnectMode::Normal if self.attempt_count <= self.config.linear_attempts => {
                self.config.base_interval
            }
            ReconnectMode::Normal => self.backoff_for(self.attempt_count) + self.jitter(),
        };

        self.count_cycle();
        Some(delay)
    }

    /// Backoff before jitter for attempt `n` in normal mode.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= self.config.linear_attempts {
            return self.config.base_interval;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled =
            self.config.base_interval.as_secs_f64() * self.config.growth_factor.powi(exponent);
        let capped = scaled.min(self.config.max_delay.as_secs_f64());

        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.config.max_delay
        }
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
        self.cycles_in_mode = 0;
        self.mode = ReconnectMode::Normal;
    }

    /// Restart the schedule in aggressive mode for a forced reconnect.
    pub const fn force(&mut self) {
        self.attempt_count = 0;
        self.cycles_in_mode = 0;
        self.mode = ReconnectMode::Aggressive;
    }

    /// Replace the base interval and attempt budget, restarting the count.
    ///
    /// Intervals below [`MIN_BASE_INTERVAL`] are raised to it.
    pub fn reconfigure(&mut self, base_interval: Duration, max_attempts: u32) {
        self.config.base_interval = base_interval.max(MIN_BASE_INTERVAL);
        self.config.max_attempts = max_attempts;
        self.reset();
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> ReconnectMode {
        self.mode
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn count_cycle(&mut self) {
        if self.config.mode_toggle_cycles == 0 {
            return;
        }
        self.cycles_in_mode += 1;
        if self.cycles_in_mode >= self.config.mode_toggle_cycles {
            self.cycles_in_mode = 0;
            self.mode = match self.mode {
                ReconnectMode::Normal => ReconnectMode::Aggressive,
                ReconnectMode::Aggressive => ReconnectMode::Normal,
            };
            tracing::debug!(mode = self.mode.as_str(), "Reconnect mode toggled");
        }
    }

    fn jitter(&self) -> Duration {
        let max_millis = u64::try_from(self.config.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_millis))
    }
}

/// Error type for reconnection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn no_toggle() -> ReconnectConfig {
        ReconnectConfig {
            mode_toggle_cycles: 0,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_interval, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.growth_factor - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.max_jitter, Duration::from_millis(1000));
        assert_eq!(config.max_attempts, 50);
    }

    #[test_case(1 ; "first attempt")]
    #[test_case(2 ; "second attempt")]
    #[test_case(3 ; "third attempt")]
    fn linear_phase_uses_base_interval_exactly(attempt: u32) {
        let mut policy = ReconnectPolicy::new(no_toggle());
        let mut delay = None;
        for _ in 0..attempt {
            delay = policy.next_delay();
        }
        assert_eq!(delay, Some(Duration::from_secs(5)));
        assert_eq!(policy.attempt_count(), attempt);
    }

    #[test_case(4, 25.3125 ; "fourth attempt")]
    #[test_case(5, 37.968_75 ; "fifth attempt")]
    #[test_case(6, 56.953_125 ; "sixth attempt")]
    #[test_case(7, 60.0 ; "capped at max delay")]
    fn exponential_backoff_before_jitter(attempt: u32, expected_secs: f64) {
        let policy = ReconnectPolicy::new(no_toggle());
        let backoff = policy.backoff_for(attempt).as_secs_f64();
        assert!((backoff - expected_secs).abs() < 1e-6, "{backoff} != {expected_secs}");
    }

    #[test]
    fn fifth_attempt_includes_bounded_jitter() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(no_toggle());
            let mut delay = Duration::ZERO;
            for _ in 0..5 {
                delay = policy.next_delay().unwrap();
            }
            let secs = delay.as_secs_f64();
            assert!(secs >= 37.968_75, "delay {secs}s is below the backoff");
            assert!(secs <= 38.968_75 + 1e-9, "delay {secs}s exceeds the jitter bound");
        }
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 3,
            ..no_toggle()
        });

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..no_toggle()
        });
        for _ in 0..500 {
            assert!(policy.next_delay().is_some());
        }
    }

    #[test]
    fn force_restarts_in_aggressive_mode() {
        let mut policy = ReconnectPolicy::new(no_toggle());
        for _ in 0..6 {
            let _ = policy.next_delay();
        }

        policy.force();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.mode(), ReconnectMode::Aggressive);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.attempt_count(), 1);
    }

    #[test]
    fn mode_toggles_every_configured_cycles() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            mode_toggle_cycles: 2,
            max_attempts: 0,
            ..ReconnectConfig::default()
        });

        assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
        assert_eq!(policy.mode(), ReconnectMode::Normal);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
        assert_eq!(policy.mode(), ReconnectMode::Aggressive);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.mode(), ReconnectMode::Normal);
    }

    #[test]
    fn reset_returns_to_normal() {
        let mut policy = ReconnectPolicy::new(no_toggle());
        policy.force();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.mode(), ReconnectMode::Normal);
        assert_eq!(policy.attempt_count(), 0);
    }

    #[test]
    fn reconfigure_floors_base_interval() {
        let mut policy = ReconnectPolicy::new(no_toggle());
        policy.reconfigure(Duration::from_secs(1), 7);
        assert_eq!(policy.config().base_interval, MIN_BASE_INTERVAL);
        assert_eq!(policy.config().max_attempts, 7);

        policy.reconfigure(Duration::from_secs(8), 7);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(8)));
    }
}
