//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for the Noren tick feed:
//! connection lifecycle, tick snapshots and the desired subscription set.
//! Nothing here performs I/O.

/// Connection lifecycle, tick and health types.
pub mod streaming;

/// Desired subscription tracking and replay planning.
pub mod subscription;
