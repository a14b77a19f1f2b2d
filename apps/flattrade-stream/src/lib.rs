#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! FlatTrade Stream - Noren Market Data Client
//!
//! Keeps one authenticated WebSocket session to the FlatTrade (Noren) tick
//! feed alive, and throttles calls to the FlatTrade REST trading API.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Connection states, ticks, health metrics
//!   - `subscription`: Desired subscription set and replay planning
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport, reachability probe, clock, token exchange
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `noren`: Ticker, wire codec, heartbeat, reconnection, WebSocket transport
//!   - `trading`: Request dispatcher and HTTP client for the trading API
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus metrics
//!   - `telemetry`: Tracing subscriber setup
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐   ticks/events   ┌──────────┐
//! Noren WS ──────►│    Ticker    │─────────────────►│ Consumer │
//!                 │ (driver task)│◄─── subscribe ───│          │
//!                 └──────────────┘                  │          │
//!                 ┌──────────────┐                  │          │
//! Trading API ◄───│  Dispatcher  │◄──── calls ──────│          │
//!                 └──────────────┘                  └──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{ConnectionState, HealthMetrics, ReconnectMode, Tick, TickKind};
pub use domain::subscription::{
    SubscribeOutcome, SubscriptionGroups, SubscriptionMode, SubscriptionRegistry,
    SubscriptionToken,
};

// Ports
pub use application::ports::{
    Clock, ReachabilityProbe, SystemClock, TokenExchange, Transport, TransportError,
};

// Ticker
pub use infrastructure::noren::{
    Credentials, Ticker, TickerConfig, TickerError, TickerEvent, WebSocketTransport,
};

// Trading API
pub use infrastructure::trading::{
    ApiError, DispatchError, DispatcherSettings, Endpoint, FlatTradeClient, RequestDispatcher,
    TradingApiConfig,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamConfig, load_dotenv};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
