//! Market Data Streaming Types
//!
//! Core domain types for the tick feed: the connection lifecycle, the tick
//! snapshot delivered to consumers and the health counters exposed by the
//! ticker. These types are codec-agnostic; the wire schema lives in
//! `infrastructure::noren::messages`.
//!
//! Every optional tick field stays `None` when the server omitted it. A
//! missing last price is never reported as zero.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a ticker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session is active.
    #[default]
    Idle,
    /// Transport handshake in progress.
    Connecting,
    /// Identify frame sent, waiting for the connect acknowledgement.
    AwaitingAck,
    /// Authenticated; ticks flow and subscriptions are live.
    Ready,
    /// Waiting for the next reconnect attempt.
    Reconnecting,
    /// Reconnect budget spent; only an explicit re-enable resumes.
    Exhausted,
    /// Teardown in progress.
    Closing,
}

impl ConnectionState {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingAck => "awaiting_ack",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Exhausted => "exhausted",
            Self::Closing => "closing",
        }
    }

    /// Whether a transport attempt is currently in flight.
    #[must_use]
    pub const fn is_attempting(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingAck)
    }

    /// Whether the session has been started and not yet closed.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Closing)
    }

    /// Numeric encoding for the state gauge.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::AwaitingAck => 2,
            Self::Ready => 3,
            Self::Reconnecting => 4,
            Self::Exhausted => 5,
            Self::Closing => 6,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff regime used by the reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// Base interval, then exponential growth.
    #[default]
    Normal,
    /// Delays collapse to a short floor.
    Aggressive,
}

impl ReconnectMode {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Aggressive => "aggressive",
        }
    }
}

/// Point-in-time view of the liveness counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthMetrics {
    /// When the last heartbeat frame was written.
    pub last_heartbeat_sent: Option<DateTime<Utc>>,
    /// When the last inbound frame of any kind arrived.
    pub last_inbound: Option<DateTime<Utc>>,
    /// Consecutive failed liveness evaluations.
    pub consecutive_failures: u32,
    /// Current reconnect regime.
    pub mode: ReconnectMode,
}

// =============================================================================
// Ticks
// =============================================================================

/// Subtype of a tick frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickKind {
    /// Full touchline snapshot sent after subscribing (`tk`).
    TouchlineSnapshot,
    /// Full depth snapshot sent after subscribing (`dk`).
    DepthSnapshot,
    /// Sparse touchline update (`tf`).
    TouchlineUpdate,
    /// Sparse depth update (`df`).
    DepthUpdate,
}

impl TickKind {
    /// Whether the frame carries the full field set.
    #[must_use]
    pub const fn is_snapshot(self) -> bool {
        matches!(self, Self::TouchlineSnapshot | Self::DepthSnapshot)
    }

    /// Whether the frame belongs to a depth subscription.
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::DepthSnapshot | Self::DepthUpdate)
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TouchlineSnapshot => "touchline_snapshot",
            Self::DepthSnapshot => "depth_snapshot",
            Self::TouchlineUpdate => "touchline_update",
            Self::DepthUpdate => "depth_update",
        }
    }
}

/// One level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Price at this level.
    pub price: Option<Decimal>,
    /// Quantity resting at this level.
    pub quantity: Option<u64>,
}

impl DepthLevel {
    fn merge(&mut self, update: &Self) {
        merge_field(&mut self.price, update.price);
        merge_field(&mut self.quantity, update.quantity);
    }
}

/// Number of depth levels published per side.
pub const DEPTH_LEVELS: usize = 5;

/// A market data update for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Snapshot or incremental, touchline or depth.
    pub kind: TickKind,
    /// Exchange segment (e.g. `NSE`, `NFO`).
    pub exchange: String,
    /// Exchange instrument token.
    pub token: String,
    /// Trading symbol.
    pub trading_symbol: Option<String>,
    /// Decimal places used for prices.
    pub price_precision: Option<u32>,
    /// Minimum price increment.
    pub tick_size: Option<Decimal>,
    /// Contract lot size.
    pub lot_size: Option<u64>,
    /// Last traded price.
    pub last_price: Option<Decimal>,
    /// Percentage change from previous close.
    pub change_percent: Option<Decimal>,
    /// Traded volume.
    pub volume: Option<u64>,
    /// Session open.
    pub open: Option<Decimal>,
    /// Session high.
    pub high: Option<Decimal>,
    /// Session low.
    pub low: Option<Decimal>,
    /// Previous close.
    pub close: Option<Decimal>,
    /// Average traded price.
    pub average_price: Option<Decimal>,
    /// Last trade time as epoch seconds.
    pub last_trade_time: Option<i64>,
    /// Last traded quantity.
    pub last_trade_quantity: Option<u64>,
    /// Total buy quantity.
    pub total_buy_quantity: Option<u64>,
    /// Total sell quantity.
    pub total_sell_quantity: Option<u64>,
    /// Open interest.
    pub open_interest: Option<u64>,
    /// Upper circuit limit.
    pub upper_circuit: Option<Decimal>,
    /// Lower circuit limit.
    pub lower_circuit: Option<Decimal>,
    /// 52 week high.
    pub week52_high: Option<Decimal>,
    /// 52 week low.
    pub week52_low: Option<Decimal>,
    /// Best bids, best first.
    pub bids: [DepthLevel; DEPTH_LEVELS],
    /// Best asks, best first.
    pub asks: [DepthLevel; DEPTH_LEVELS],
    /// When the frame was received.
    pub received_at: DateTime<Utc>,
}

impl Tick {
    /// Create a tick with only its identity set.
    #[must_use]
    pub fn new(
        kind: TickKind,
        exchange: impl Into<String>,
        token: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            exchange: exchange.into(),
            token: token.into(),
            trading_symbol: None,
            price_precision: None,
            tick_size: None,
            lot_size: None,
            last_price: None,
            change_percent: None,
            volume: None,
            open: None,
            high: None,
            low: None,
            close: None,
            average_price: None,
            last_trade_time: None,
            last_trade_quantity: None,
            total_buy_quantity: None,
            total_sell_quantity: None,
            open_interest: None,
            upper_circuit: None,
            lower_circuit: None,
            week52_high: None,
            week52_low: None,
            bids: [DepthLevel::default(); DEPTH_LEVELS],
            asks: [DepthLevel::default(); DEPTH_LEVELS],
            received_at,
        }
    }

    /// Last trade time as a UTC timestamp.
    #[must_use]
    pub fn last_trade_at(&self) -> Option<DateTime<Utc>> {
        self.last_trade_time
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Fold an incremental update onto this tick.
    ///
    /// Fields present in `update` overwrite, absent fields are kept. The kind
    /// and receive time follow the update. Updates for another instrument
    /// are ignored.
    pub fn merge(&mut self, update: &Self) {
        if update.exchange != self.exchange || update.token != self.token {
            return;
        }

        self.kind = update.kind;
        self.received_at = update.received_at;

        merge_field(&mut self.trading_symbol, update.trading_symbol.clone());
        merge_field(&mut self.price_precision, update.price_precision);
        merge_field(&mut self.tick_size, update.tick_size);
        merge_field(&mut self.lot_size, update.lot_size);
        merge_field(&mut self.last_price, update.last_price);
        merge_field(&mut self.change_percent, update.change_percent);
        merge_field(&mut self.volume, update.volume);
        merge_field(&mut self.open, update.open);
        merge_field(&mut self.high, update.high);
        merge_field(&mut self.low, update.low);
        merge_field(&mut self.close, update.close);
        merge_field(&mut self.average_price, update.average_price);
        merge_field(&mut self.last_trade_time, update.last_trade_time);
        merge_field(&mut self.last_trade_quantity, update.last_trade_quantity);
        merge_field(&mut self.total_buy_quantity, update.total_buy_quantity);
        merge_field(&mut self.total_sell_quantity, update.total_sell_quantity);
        merge_field(&mut self.open_interest, update.open_interest);
        merge_field(&mut self.upper_circuit, update.upper_circuit);
        merge_field(&mut self.lower_circuit, update.lower_circuit);
        merge_field(&mut self.week52_high, update.week52_high);
        merge_field(&mut self.week52_low, update.week52_low);

        for (level, incoming) in self.bids.iter_mut().zip(update.bids.iter()) {
            level.merge(incoming);
        }
        for (level, incoming) in self.asks.iter_mut().zip(update.asks.iter()) {
            level.merge(incoming);
        }
    }
}

fn merge_field<T>(current: &mut Option<T>, update: Option<T>) {
    if update.is_some() {
        *current = update;
    }
}
