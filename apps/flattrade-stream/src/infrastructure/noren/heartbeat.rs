//! Health Monitor
//!
//! Tracks connection liveness for the ticker. The feed never answers
//! heartbeats, so liveness is inferred from inbound traffic of any kind.
//!
//! The ticker calls [`HealthMonitor::evaluate`] on every health-check tick
//! with the result of a reachability probe. The monitor returns a verdict;
//! acting on it (scheduling or forcing a reconnect) is the ticker's job.
//!
//! # Evaluation order
//!
//! 1. A wall-clock gap between evaluations much larger than the check
//!    interval means the host was suspended: force a reconnect.
//! 2. Network down: count a failure, force at the threshold.
//! 3. Network back after being down: force immediately.
//! 4. Not ready: count a failure, force at the threshold, otherwise make
//!    sure a normal reconnect is pending.
//! 5. Ready but silent since the last heartbeat for longer than
//!    `stale_after`: count a failure, force at the threshold.
//! 6. Otherwise healthy: reset the failure count.
//!
//! At most one forced reconnect is in flight, and forced reconnects are
//! spaced by `min_force_interval` (suspension ignores the spacing).

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::domain::streaming::{HealthMetrics, ReconnectMode};

/// Configuration for heartbeat and liveness checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Interval between heartbeat frames while ready.
    pub heartbeat_interval: Duration,
    /// Interval between liveness evaluations.
    pub check_interval: Duration,
    /// Consecutive failed evaluations that trigger a forced reconnect.
    pub max_failures: u32,
    /// Silence after a heartbeat that marks the connection stale.
    pub stale_after: Duration,
    /// Evaluation gap, in multiples of `check_interval`, treated as suspension.
    pub suspend_factor: u32,
    /// Minimum spacing between forced reconnects.
    pub min_force_interval: Duration,
    /// Timeout for each reachability probe.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(40),
            check_interval: Duration::from_secs(30),
            max_failures: 2,
            stale_after: Duration::from_secs(90),
            suspend_factor: 3,
            min_force_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

/// Why a forced reconnect was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceReason {
    /// Probe failed at the threshold.
    NetworkDown,
    /// Network came back after a failed probe.
    NetworkRestored,
    /// Connection stayed unready at the threshold.
    NotReady,
    /// No inbound traffic after a heartbeat at the threshold.
    Stale,
    /// The host was suspended between evaluations.
    Suspended,
}

impl ForceReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkDown => "network_down",
            Self::NetworkRestored => "network_restored",
            Self::NotReady => "not_ready",
            Self::Stale => "stale",
            Self::Suspended => "suspended",
        }
    }
}

/// Outcome of one liveness evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    /// Connection is ready and fresh.
    Healthy,
    /// A failure was counted; below the threshold.
    Degraded {
        /// Failures so far.
        failures: u32,
    },
    /// Not ready and below the threshold; a normal reconnect should be pending.
    EnsureReconnect {
        /// Failures so far.
        failures: u32,
    },
    /// Tear down and reconnect now.
    ForceReconnect(ForceReason),
    /// A force was warranted but another is in flight or too recent.
    Suppressed(ForceReason),
}

/// Liveness state for one ticker session.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
    last_heartbeat_sent: Option<DateTime<Utc>>,
    last_inbound: Option<DateTime<Utc>>,
    last_evaluation: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    network_was_down: bool,
    force_pending: bool,
    last_forced: Option<DateTime<Utc>>,
}

impl HealthMonitor {
    /// Create a monitor.
    #[must_use]
    pub const fn new(config: HealthConfig) -> Self {
        Self {
            config,
            last_heartbeat_sent: None,
            last_inbound: None,
            last_evaluation: None,
            consecutive_failures: 0,
            network_was_down: false,
            force_pending: false,
            last_forced: None,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Start a fresh session at `now`.
    pub fn start_session(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_sent = None;
        self.last_inbound = None;
        self.last_evaluation = Some(now);
        self.consecutive_failures = 0;
        self.network_was_down = false;
        self.force_pending = false;
    }

    /// Stop evaluating until the next session.
    pub fn stop(&mut self) {
        self.last_evaluation = None;
        self.force_pending = false;
    }

    /// Checks restart after a pause at `now`. The paused span does not count
    /// as an evaluation gap.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.last_evaluation = Some(now);
    }

    /// Record an inbound frame of any kind.
    pub fn record_inbound(&mut self, now: DateTime<Utc>) {
        self.last_inbound = Some(now);
    }

    /// Record a heartbeat frame written to the transport.
    pub fn record_heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_sent = Some(now);
    }

    /// The connection reached ready.
    pub fn on_ready(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.force_pending = false;
        self.last_inbound = Some(now);
        self.last_heartbeat_sent = None;
    }

    /// A connection attempt failed. Settles any in-flight forced reconnect.
    pub fn on_attempt_failed(&mut self) {
        if self.force_pending {
            self.force_pending = false;
            self.consecutive_failures = 0;
        }
    }

    /// Whether a forced reconnect is in flight.
    #[must_use]
    pub const fn force_pending(&self) -> bool {
        self.force_pending
    }

    /// Consecutive failed evaluations.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Snapshot of the counters.
    #[must_use]
    pub const fn metrics(&self, mode: ReconnectMode) -> HealthMetrics {
        HealthMetrics {
            last_heartbeat_sent: self.last_heartbeat_sent,
            last_inbound: self.last_inbound,
            consecutive_failures: self.consecutive_failures,
            mode,
        }
    }

    /// Evaluate liveness at `now`.
    pub fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        network_up: bool,
        ready: bool,
    ) -> LivenessVerdict {
        let previous = self.last_evaluation.replace(now);

        if let Some(previous) = previous
            && now - previous > self.suspend_threshold()
        {
            tracing::warn!(
                gap_secs = (now - previous).num_seconds(),
                "Evaluation gap suggests host suspension"
            );
            return self.request_force(now, ForceReason::Suspended, true);
        }

        if !network_up {
            self.network_was_down = true;
            return self.count_failure(now, ForceReason::NetworkDown, false);
        }

        if self.network_was_down {
            self.network_was_down = false;
            tracing::info!("Network restored");
            return self.request_force(now, ForceReason::NetworkRestored, false);
        }

        if !ready {
            return self.count_failure(now, ForceReason::NotReady, true);
        }

        if self.is_stale(now) {
            return self.count_failure(now, ForceReason::Stale, false);
        }

        self.consecutive_failures = 0;
        LivenessVerdict::Healthy
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let Some(heartbeat) = self.last_heartbeat_sent else {
            return false;
        };
        let Some(inbound) = self.last_inbound else {
            return true;
        };
        heartbeat >= inbound && now - inbound > to_delta(self.config.stale_after)
    }

    fn count_failure(
        &mut self,
        now: DateTime<Utc>,
        reason: ForceReason,
        ensure_below_threshold: bool,
    ) -> LivenessVerdict {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let failures = self.consecutive_failures;

        if failures >= self.config.max_failures {
            return self.request_force(now, reason, false);
        }

        if ensure_below_threshold {
            LivenessVerdict::EnsureReconnect { failures }
        } else {
            LivenessVerdict::Degraded { failures }
        }
    }

    fn request_force(
        &mut self,
        now: DateTime<Utc>,
        reason: ForceReason,
        ignore_spacing: bool,
    ) -> LivenessVerdict {
        if self.force_pending {
            return LivenessVerdict::Suppressed(reason);
        }

        let too_soon = self
            .last_forced
            .is_some_and(|last| now - last < to_delta(self.config.min_force_interval));
        if too_soon && !ignore_spacing {
            tracing::debug!(reason = reason.as_str(), "Forced reconnect too soon, skipping");
            return LivenessVerdict::Suppressed(reason);
        }

        self.force_pending = true;
        self.last_forced = Some(now);
        LivenessVerdict::ForceReconnect(reason)
    }

    fn suspend_threshold(&self) -> TimeDelta {
        to_delta(self.config.check_interval * self.config.suspend_factor.max(1))
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
