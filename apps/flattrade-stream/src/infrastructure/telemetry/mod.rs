//! Tracing Subscriber Setup
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a fmt
//! layer. Installation uses `try_init`, so a second call (tests, or an
//! embedding application that already set a subscriber) is a no-op.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives, merged with the default directive
//! - `FLATTRADE_LOG_FORMAT`: `json` for JSON lines, anything else for text
//!
//! # Usage
//!
//! ```ignore
//! use flattrade_stream::infrastructure::telemetry;
//!
//! let _guard = telemetry::init();
//! tracing::info!("Ticker starting");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Directive applied on top of `RUST_LOG`.
const DEFAULT_DIRECTIVE: &str = "flattrade_stream=info";

/// Guard returned by [`init`]. Flushes nothing today; kept so callers hold
/// telemetry for the life of the program.
#[derive(Debug)]
pub struct TelemetryGuard {
    installed: bool,
}

impl TelemetryGuard {
    /// Whether this call installed the global subscriber.
    #[must_use]
    pub const fn installed(&self) -> bool {
        self.installed
    }
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Directive added to the `RUST_LOG` filter.
    pub default_directive: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_directive: DEFAULT_DIRECTIVE.to_string(),
            format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let format = match std::env::var("FLATTRADE_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            format,
            ..Self::default()
        }
    }
}

/// Initialize telemetry with configuration from the environment.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(&TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
#[must_use]
pub fn init_with_config(config: &TelemetryConfig) -> TelemetryGuard {
    let mut env_filter = EnvFilter::from_default_env();
    match config.default_directive.parse::<Directive>() {
        Ok(directive) => env_filter = env_filter.add_directive(directive),
        Err(e) => eprintln!(
            "Ignoring invalid log directive '{}': {e}",
            config.default_directive
        ),
    }

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
    };

    TelemetryGuard {
        installed: result.is_ok(),
    }
}

// =============================================================================
// Tests
// =============================================================================
