//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Noren WebSocket ticker (transport, codec, health, reconnection).
pub mod noren;

/// Rate-limited dispatcher and HTTP client for the trading REST API.
pub mod trading;

/// Configuration loading from environment variables.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber setup.
pub mod telemetry;
