//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the ticker and
//! the trading dispatcher interact with external systems.

/// Port interfaces for external systems (transport, probe, clock, token exchange).
pub mod ports;
