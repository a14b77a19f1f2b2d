//! Stream Configuration Settings
//!
//! Configuration for the ticker and trading client, loaded from environment
//! variables. Unset or unparseable tuning variables fall back to defaults;
//! missing credentials are an error.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `FLATTRADE_USER_ID` | required |
//! | `FLATTRADE_ACCESS_TOKEN` | required |
//! | `FLATTRADE_ACCOUNT_ID` | user id |
//! | `FLATTRADE_WS_URL` | production feed |
//! | `FLATTRADE_API_URL` | production API |
//! | `FLATTRADE_AUTO_RECONNECT` | `true` |
//! | `FLATTRADE_RECONNECT_INTERVAL_SECS` | 5 |
//! | `FLATTRADE_RECONNECT_MAX_DELAY_SECS` | 60 |
//! | `FLATTRADE_RECONNECT_MAX_ATTEMPTS` | 50 |
//! | `FLATTRADE_HEARTBEAT_INTERVAL_SECS` | 40 |
//! | `FLATTRADE_HEALTH_CHECK_INTERVAL_SECS` | 30 |
//! | `FLATTRADE_HEALTH_MAX_FAILURES` | 2 |
//! | `FLATTRADE_STALE_AFTER_SECS` | 90 |
//! | `FLATTRADE_API_MAX_CONCURRENT` | 5 |
//! | `FLATTRADE_API_MAX_PER_SECOND` | 10 |
//! | `FLATTRADE_API_TIMEOUT_SECS` | 30 |

use std::time::Duration;

use crate::infrastructure::noren::heartbeat::HealthConfig;
use crate::infrastructure::noren::reconnect::ReconnectConfig;
use crate::infrastructure::noren::{Credentials, DEFAULT_WS_URL, TickerConfig};
use crate::infrastructure::trading::{DEFAULT_BASE_URL, DispatcherSettings, TradingApiConfig};

/// Complete configuration for one FlatTrade session.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Session credentials, shared by the feed and the trading API.
    pub credentials: Credentials,
    /// Tick feed WebSocket URL.
    pub ws_url: String,
    /// Trading API base URL.
    pub api_base_url: String,
    /// Reconnect automatically after a drop.
    pub auto_reconnect: bool,
    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,
    /// Heartbeat and liveness checks.
    pub health: HealthConfig,
    /// Trading API limits.
    pub dispatcher: DispatcherSettings,
    /// Trading API request timeout.
    pub api_timeout: Duration,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the user id or access token is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let user_id = env.required("FLATTRADE_USER_ID")?;
        let access_token = env.required("FLATTRADE_ACCESS_TOKEN")?;
        let account_id = env
            .get("FLATTRADE_ACCOUNT_ID")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| user_id.clone());

        let reconnect_defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            base_interval: env.duration_secs(
                "FLATTRADE_RECONNECT_INTERVAL_SECS",
                reconnect_defaults.base_interval,
            ),
            max_delay: env.duration_secs(
                "FLATTRADE_RECONNECT_MAX_DELAY_SECS",
                reconnect_defaults.max_delay,
            ),
            max_attempts: env.parse(
                "FLATTRADE_RECONNECT_MAX_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
            ..reconnect_defaults
        };

        let health_defaults = HealthConfig::default();
        let health = HealthConfig {
            heartbeat_interval: env.duration_secs(
                "FLATTRADE_HEARTBEAT_INTERVAL_SECS",
                health_defaults.heartbeat_interval,
            ),
            check_interval: env.duration_secs(
                "FLATTRADE_HEALTH_CHECK_INTERVAL_SECS",
                health_defaults.check_interval,
            ),
            max_failures: env.parse("FLATTRADE_HEALTH_MAX_FAILURES", health_defaults.max_failures),
            stale_after: env.duration_secs(
                "FLATTRADE_STALE_AFTER_SECS",
                health_defaults.stale_after,
            ),
            ..health_defaults
        };

        let dispatcher_defaults = DispatcherSettings::default();
        let dispatcher = DispatcherSettings {
            max_concurrent: env.parse(
                "FLATTRADE_API_MAX_CONCURRENT",
                dispatcher_defaults.max_concurrent,
            ),
            max_per_second: env.parse(
                "FLATTRADE_API_MAX_PER_SECOND",
                dispatcher_defaults.max_per_second,
            ),
        };

        Ok(Self {
            credentials: Credentials::new(user_id, account_id, access_token),
            ws_url: env
                .get("FLATTRADE_WS_URL")
                .unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            api_base_url: env
                .get("FLATTRADE_API_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            auto_reconnect: env.flag("FLATTRADE_AUTO_RECONNECT", true),
            reconnect,
            health,
            dispatcher,
            api_timeout: env.duration_secs("FLATTRADE_API_TIMEOUT_SECS", Duration::from_secs(30)),
        })
    }

    /// Ticker configuration for this session.
    #[must_use]
    pub fn ticker_config(&self) -> TickerConfig {
        let mut config = TickerConfig::with_url(self.ws_url.clone(), self.credentials.clone());
        config.reconnect = self.reconnect.clone();
        config.health = self.health.clone();
        config.auto_reconnect = self.auto_reconnect;
        config
    }

    /// Trading client configuration for this session.
    #[must_use]
    pub fn trading_config(&self) -> TradingApiConfig {
        let mut config = TradingApiConfig::new(
            self.credentials.user_id(),
            self.credentials.account_id(),
            self.credentials.access_token(),
        )
        .with_base_url(self.api_base_url.clone())
        .with_dispatcher(self.dispatcher);
        config.timeout = self.api_timeout;
        config
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, |v| {
            !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off")
        })
    }
}

/// Load a `.env` file from the current directory or the nearest ancestor
/// that has one. A missing file is not an error.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<StreamConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_user_id_is_an_error() {
        let err = load(&[("FLATTRADE_ACCESS_TOKEN", "tok")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "FLATTRADE_USER_ID"));
    }

    #[test]
    fn empty_token_is_an_error() {
        let err = load(&[("FLATTRADE_USER_ID", "FT1"), ("FLATTRADE_ACCESS_TOKEN", "")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(key) if key == "FLATTRADE_ACCESS_TOKEN"));
    }

    #[test]
    fn defaults_when_only_credentials_are_set() {
        let config =
            load(&[("FLATTRADE_USER_ID", "FT1"), ("FLATTRADE_ACCESS_TOKEN", "tok")]).unwrap();

        assert_eq!(config.credentials.account_id(), "FT1");
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.api_base_url, DEFAULT_BASE_URL);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.health, HealthConfig::default());
        assert_eq!(config.dispatcher, DispatcherSettings::default());
    }

    #[test]
    fn overrides_are_applied_and_garbage_ignored() {
        let config = load(&[
            ("FLATTRADE_USER_ID", "FT1"),
            ("FLATTRADE_ACCESS_TOKEN", "tok"),
            ("FLATTRADE_ACCOUNT_ID", "ACC9"),
            ("FLATTRADE_AUTO_RECONNECT", "false"),
            ("FLATTRADE_RECONNECT_MAX_ATTEMPTS", "7"),
            ("FLATTRADE_HEARTBEAT_INTERVAL_SECS", "abc"),
            ("FLATTRADE_API_MAX_PER_SECOND", "3"),
        ])
        .unwrap();

        assert_eq!(config.credentials.account_id(), "ACC9");
        assert!(!config.auto_reconnect);
        assert_eq!(config.reconnect.max_attempts, 7);
        assert_eq!(config.health.heartbeat_interval, Duration::from_secs(40));
        assert_eq!(config.dispatcher.max_per_second, 3);
    }

    #[test]
    fn derived_configs_share_credentials() {
        let config = load(&[
            ("FLATTRADE_USER_ID", "FT1"),
            ("FLATTRADE_ACCESS_TOKEN", "tok"),
            ("FLATTRADE_WS_URL", "ws://127.0.0.1:9000"),
        ])
        .unwrap();

        let ticker = config.ticker_config();
        assert_eq!(ticker.url, "ws://127.0.0.1:9000");
        assert_eq!(ticker.credentials.access_token(), "tok");

        let trading = config.trading_config();
        assert_eq!(trading.user_id, "FT1");
        assert_eq!(trading.access_token, "tok");
    }
}
