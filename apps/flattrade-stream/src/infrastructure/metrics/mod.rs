//! Prometheus Metrics Module
//!
//! Application metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Feed**: Ticks received by kind, frames dropped or malformed
//! - **Connection**: Ticker state, reconnects (normal and forced)
//! - **Subscriptions**: Desired subscription count
//! - **Dispatcher**: Queue depth, call outcomes and latency
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder, so
//! library users that never call it pay nothing.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::{ConnectionState, TickKind};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Repeated calls return the handle installed by the first one.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed counters
    describe_counter!(
        "flattrade_stream_ticks_received_total",
        "Ticks received from the feed by kind"
    );
    describe_counter!(
        "flattrade_stream_ticks_dropped_total",
        "Ticks dropped because the event channel was full"
    );
    describe_counter!(
        "flattrade_stream_frames_malformed_total",
        "Inbound frames that failed to decode"
    );

    // Connection
    describe_gauge!(
        "flattrade_stream_connection_state",
        "Ticker connection state ordinal"
    );
    describe_counter!(
        "flattrade_stream_reconnects_total",
        "Reconnection attempts by kind"
    );

    // Subscriptions
    describe_gauge!(
        "flattrade_stream_subscriptions",
        "Desired subscriptions held by the registry"
    );

    // Dispatcher
    describe_gauge!(
        "flattrade_stream_dispatcher_queued",
        "Calls waiting for a dispatcher slot"
    );
    describe_counter!(
        "flattrade_stream_api_calls_total",
        "Trading API calls by endpoint and outcome"
    );
    describe_histogram!(
        "flattrade_stream_api_call_seconds",
        "Trading API call latency"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a dispatched API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Server answered `Ok`.
    Success,
    /// Server answered but reported a failure.
    Failure,
    /// Credentials were rejected.
    Unauthorized,
    /// Transport or decoding error.
    Error,
}

impl CallOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unauthorized => "unauthorized",
            Self::Error => "error",
        }
    }
}

/// Record a tick received from the feed.
pub fn record_tick(kind: TickKind) {
    counter!(
        "flattrade_stream_ticks_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a tick dropped because the consumer is behind.
pub fn record_tick_dropped() {
    counter!("flattrade_stream_ticks_dropped_total").increment(1);
}

/// Record an inbound frame that failed to decode.
pub fn record_malformed_frame() {
    counter!("flattrade_stream_frames_malformed_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("flattrade_stream_connection_state").set(f64::from(state.ordinal()));
}

/// Record a scheduled or forced reconnection attempt.
pub fn record_reconnect(forced: bool) {
    counter!(
        "flattrade_stream_reconnects_total",
        "kind" => if forced { "forced" } else { "scheduled" }
    )
    .increment(1);
}

/// Update the desired subscription count.
pub fn set_subscriptions(count: usize) {
    gauge!("flattrade_stream_subscriptions").set(count as f64);
}

/// Update the number of calls waiting for a dispatcher slot.
pub fn set_dispatcher_queued(count: usize) {
    gauge!("flattrade_stream_dispatcher_queued").set(count as f64);
}

/// Record a finished API call.
pub fn record_api_call(endpoint: &'static str, outcome: CallOutcome, elapsed: Duration) {
    counter!(
        "flattrade_stream_api_calls_total",
        "endpoint" => endpoint,
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "flattrade_stream_api_call_seconds",
        "endpoint" => endpoint
    )
    .record(elapsed.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_outcome_as_str() {
        assert_eq!(CallOutcome::Success.as_str(), "success");
        assert_eq!(CallOutcome::Failure.as_str(), "failure");
        assert_eq!(CallOutcome::Unauthorized.as_str(), "unauthorized");
        assert_eq!(CallOutcome::Error.as_str(), "error");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick(TickKind::TouchlineUpdate);
        record_reconnect(true);
        set_subscriptions(3);
        set_connection_state(ConnectionState::Ready);
    }
}
