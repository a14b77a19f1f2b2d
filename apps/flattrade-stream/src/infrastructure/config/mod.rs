//! Configuration Module
//!
//! Environment-driven configuration for the ticker and the trading client.

mod settings;

pub use settings::{ConfigError, StreamConfig, load_dotenv};
