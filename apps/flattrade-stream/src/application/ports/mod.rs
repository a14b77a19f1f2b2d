//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: Duplex message connection to the tick feed
//! - `ReachabilityProbe`: Cheap "is the network up" check
//! - `Clock`: Wall-clock time source
//! - `TokenExchange`: One-time request code to access token exchange

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

// =============================================================================
// Transport
// =============================================================================

/// How to shut a transport down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Perform the close handshake.
    Graceful,
    /// Drop the connection without a handshake.
    Abortive,
}

/// What happened on a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Handshake completed.
    Opened,
    /// A complete text message arrived.
    Message(String),
    /// The connection ended.
    Closed {
        /// Whether the server initiated the close.
        remote: bool,
    },
    /// The connection failed.
    Error(String),
}

/// Event raised by a transport, tagged with the session that produced it.
///
/// Sessions are numbered by the caller of [`Transport::open`], so events from
/// a connection that has since been replaced can be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Session number passed to `open`.
    pub session: u64,
    /// Event payload.
    pub kind: TransportEventKind,
}

impl TransportEvent {
    /// Create an event.
    #[must_use]
    pub const fn new(session: u64, kind: TransportEventKind) -> Self {
        Self { session, kind }
    }
}

/// Errors raised while opening a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Handshake failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Handshake did not complete in time.
    #[error("connection timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The URL could not be used.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Message-oriented duplex connection.
///
/// `open` completes the handshake and starts a receive loop that reports
/// through `events` until the session ends. The loop never panics or
/// propagates; every failure becomes a [`TransportEventKind::Error`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new session, replacing any previous one.
    async fn open(
        &self,
        url: &str,
        session: u64,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError>;

    /// Queue a text frame. Returns `false` (and logs) when not open.
    fn send(&self, text: String) -> bool;

    /// Shut the current session down.
    async fn close(&self, mode: CloseMode);

    /// Whether a session is currently open.
    fn is_open(&self) -> bool;
}

// =============================================================================
// Reachability
// =============================================================================

/// Network reachability check used by the liveness monitor.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync + 'static {
    /// Whether at least one well-known endpoint answered.
    async fn is_reachable(&self) -> bool;
}

// =============================================================================
// Clock
// =============================================================================

/// Wall-clock source.
///
/// The monitor compares wall time between evaluations to notice host
/// suspension, which a monotonic clock would hide.
pub trait Clock: Send + Sync + 'static {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock moved by hand, for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock();
        *now += delta;
    }

    /// Jump to `to`.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// =============================================================================
// Token Exchange
// =============================================================================

/// Errors from the token exchange collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenExchangeError {
    /// The request code was rejected.
    #[error("token exchange rejected: {0}")]
    Rejected(String),
    /// The exchange endpoint could not be reached.
    #[error("token exchange failed: {0}")]
    Transport(String),
}

/// Exchanges a one-time request code for a session access token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Perform the exchange.
    async fn exchange(&self, request_code: &str) -> Result<String, TokenExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(TimeDelta::seconds(30));
        assert_eq!(clock.now(), start + TimeDelta::seconds(30));

        let other = clock.clone();
        other.set(start);
        assert_eq!(clock.now(), start);
    }
}
