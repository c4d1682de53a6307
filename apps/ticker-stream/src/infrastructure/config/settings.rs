//! Stream Configuration Settings
//!
//! Configuration types for the ticker stream, loaded from environment
//! variables. Parsing goes through a lookup closure so tests never touch
//! the process environment.

use std::num::{NonZeroU32, NonZeroUsize};
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{ConnectionConfig, ReconnectConfig, SupervisorConfig};
use crate::domain::alert::{AlertError, NewAlertRule};
use crate::domain::market::{SourceKind, Symbol, SymbolError};
use crate::infrastructure::binance::{
    BinanceFeedConfig, DEFAULT_REST_URL, DEFAULT_WS_URL, SnapshotClientConfig,
};

/// Market feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Symbol watched at start-up.
    pub symbol: Symbol,
    /// Payload kind to subscribe to.
    pub kind: SourceKind,
    /// Websocket base URL.
    pub ws_url: String,
    /// REST base URL.
    pub rest_url: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            symbol: Symbol::new("BTCUSDT").unwrap_or_else(|_| unreachable!()),
            kind: SourceKind::Trade,
            ws_url: DEFAULT_WS_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
        }
    }
}

/// Buffer, alert and connection lifecycle settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Samples kept in the price buffer.
    pub buffer_capacity: NonZeroUsize,
    /// Alert events kept in the history log.
    pub alert_history_limit: NonZeroUsize,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to each delay.
    pub reconnect_jitter: f64,
    /// Consecutive failures before the stream is reported unavailable.
    pub max_reconnect_attempts: NonZeroU32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        let supervisor = SupervisorConfig::default();
        Self {
            buffer_capacity: supervisor.buffer_capacity,
            alert_history_limit: supervisor.alert_history_limit,
            connect_timeout: supervisor.connection.connect_timeout,
            reconnect_delay_initial: reconnect.initial_delay,
            reconnect_delay_max: reconnect.max_delay,
            reconnect_delay_multiplier: reconnect.multiplier,
            reconnect_jitter: reconnect.jitter_factor,
            max_reconnect_attempts: reconnect.max_attempts,
        }
    }
}

/// Summary snapshot settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSettings {
    /// Summaries kept after ranking.
    pub limit: usize,
    /// Bounded fetch attempts.
    pub retries: u32,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            limit: 50,
            retries: 3,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamConfig {
    /// Feed settings.
    pub feed: FeedSettings,
    /// Stream lifecycle settings.
    pub stream: StreamSettings,
    /// Snapshot settings.
    pub snapshot: SnapshotSettings,
    /// Server settings.
    pub server: ServerSettings,
    /// Alert rules registered at start-up.
    pub alerts: Vec<NewAlertRule>,
}

impl StreamConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparseable or out-of-range values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`. Unset keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparseable or out-of-range values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let feed = FeedSettings {
            symbol: match env.get("TICKER_SYMBOL") {
                Some(raw) => Symbol::new(&raw).map_err(|source| ConfigError::Symbol {
                    key: "TICKER_SYMBOL",
                    source,
                })?,
                None => defaults.feed.symbol,
            },
            kind: match env.get("TICKER_STREAM_KIND") {
                Some(raw) => SourceKind::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                    key: "TICKER_STREAM_KIND",
                    value: raw.clone(),
                    reason: "expected trade, aggTrade or ticker".to_string(),
                })?,
                None => defaults.feed.kind,
            },
            ws_url: env.get("BINANCE_WS_URL").unwrap_or(defaults.feed.ws_url),
            rest_url: env.get("BINANCE_REST_URL").unwrap_or(defaults.feed.rest_url),
        };

        let d = defaults.stream;
        let stream = StreamSettings {
            buffer_capacity: env.parse("TICKER_BUFFER_CAPACITY", d.buffer_capacity)?,
            alert_history_limit: env.parse("TICKER_ALERT_HISTORY_LIMIT", d.alert_history_limit)?,
            connect_timeout: env.secs("TICKER_CONNECT_TIMEOUT_SECS", d.connect_timeout)?,
            reconnect_delay_initial: env.millis(
                "TICKER_RECONNECT_DELAY_INITIAL_MS",
                d.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env.secs("TICKER_RECONNECT_DELAY_MAX_SECS", d.reconnect_delay_max)?,
            reconnect_delay_multiplier: env.parse(
                "TICKER_RECONNECT_DELAY_MULTIPLIER",
                d.reconnect_delay_multiplier,
            )?,
            reconnect_jitter: env.parse("TICKER_RECONNECT_JITTER", d.reconnect_jitter)?,
            max_reconnect_attempts: env.parse(
                "TICKER_MAX_RECONNECT_ATTEMPTS",
                d.max_reconnect_attempts,
            )?,
        };

        let snapshot = SnapshotSettings {
            limit: env.parse("TICKER_SNAPSHOT_LIMIT", defaults.snapshot.limit)?,
            retries: env.parse("TICKER_SNAPSHOT_RETRIES", defaults.snapshot.retries)?,
        };

        let server = ServerSettings {
            health_port: env.parse("TICKER_HEALTH_PORT", defaults.server.health_port)?,
        };

        let alerts = env
            .get("TICKER_ALERTS")
            .map(|raw| parse_alert_specs(&raw))
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            feed,
            stream,
            snapshot,
            server,
            alerts,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stream;
        if !(0.0..=1.0).contains(&s.reconnect_jitter) {
            return Err(invalid(
                "TICKER_RECONNECT_JITTER",
                s.reconnect_jitter,
                "must be between 0.0 and 1.0",
            ));
        }
        if !s.reconnect_delay_multiplier.is_finite() || s.reconnect_delay_multiplier < 1.0 {
            return Err(invalid(
                "TICKER_RECONNECT_DELAY_MULTIPLIER",
                s.reconnect_delay_multiplier,
                "must be at least 1.0",
            ));
        }
        if s.reconnect_delay_initial.is_zero() {
            return Err(invalid("TICKER_RECONNECT_DELAY_INITIAL_MS", 0, "must be positive"));
        }
        if s.reconnect_delay_max < s.reconnect_delay_initial {
            return Err(invalid(
                "TICKER_RECONNECT_DELAY_MAX_SECS",
                s.reconnect_delay_max.as_secs(),
                "must not be below the initial delay",
            ));
        }
        if s.connect_timeout.is_zero() {
            return Err(invalid("TICKER_CONNECT_TIMEOUT_SECS", 0, "must be positive"));
        }
        if self.snapshot.limit == 0 {
            return Err(invalid("TICKER_SNAPSHOT_LIMIT", 0, "must be positive"));
        }
        Ok(())
    }

    /// Supervisor settings derived from this configuration.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        let s = &self.stream;
        SupervisorConfig {
            buffer_capacity: s.buffer_capacity,
            alert_history_limit: s.alert_history_limit,
            connection: ConnectionConfig {
                connect_timeout: s.connect_timeout,
                reconnect: ReconnectConfig {
                    initial_delay: s.reconnect_delay_initial,
                    max_delay: s.reconnect_delay_max,
                    multiplier: s.reconnect_delay_multiplier,
                    jitter_factor: s.reconnect_jitter,
                    max_attempts: s.max_reconnect_attempts,
                },
            },
            ..SupervisorConfig::default()
        }
    }

    /// Websocket feed settings.
    #[must_use]
    pub fn feed_config(&self) -> BinanceFeedConfig {
        BinanceFeedConfig {
            base_url: self.feed.ws_url.clone(),
            kind: self.feed.kind,
        }
    }

    /// REST snapshot client settings.
    #[must_use]
    pub fn snapshot_client_config(&self) -> SnapshotClientConfig {
        SnapshotClientConfig {
            base_url: self.feed.rest_url.clone(),
            limit: self.snapshot.limit,
            ..SnapshotClientConfig::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value could not be parsed or is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Environment variable.
        key: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Symbol is invalid.
    #[error("invalid {key}: {source}")]
    Symbol {
        /// Environment variable.
        key: &'static str,
        /// Parse error.
        source: SymbolError,
    },
    /// An alert rule spec is invalid.
    #[error("invalid TICKER_ALERTS entry: {0}")]
    Alert(#[from] AlertError),
}

fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse comma-separated alert rule specs, skipping empty entries.
fn parse_alert_specs(raw: &str) -> Result<Vec<NewAlertRule>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|spec| !spec.is_empty())
        .map(|spec| NewAlertRule::parse(spec).map_err(ConfigError::from))
        .collect()
}

/// Typed access to a lookup function.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse::<u64>(key, default.as_secs())
            .map(Duration::from_secs)
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse::<u64>(key, default).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use test_case::test_case;

    fn load(vars: &[(&str, &str)]) -> Result<StreamConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.feed.symbol.as_str(), "BTCUSDT");
        assert_eq!(config.feed.kind, SourceKind::Trade);
        assert_eq!(config.feed.ws_url, "wss://stream.binance.com:9443/ws");
        assert_eq!(config.stream.buffer_capacity.get(), 300);
        assert_eq!(config.stream.alert_history_limit.get(), 50);
        assert_eq!(config.stream.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.stream.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(config.stream.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(config.stream.max_reconnect_attempts.get(), 10);
        assert_eq!(config.snapshot, SnapshotSettings::default());
        assert_eq!(config.server.health_port, 8083);
        assert!(config.alerts.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("TICKER_SYMBOL", "ethusdt"),
            ("TICKER_STREAM_KIND", "aggTrade"),
            ("TICKER_BUFFER_CAPACITY", "600"),
            ("TICKER_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("TICKER_MAX_RECONNECT_ATTEMPTS", "3"),
            ("TICKER_HEALTH_PORT", "0"),
            ("TICKER_ALERTS", "ETHUSDT:above:4000, ETHUSDT:change:5:60,"),
        ])
        .unwrap();

        assert_eq!(config.feed.symbol.as_str(), "ETHUSDT");
        assert_eq!(config.feed.kind, SourceKind::AggTrade);
        assert_eq!(config.stream.buffer_capacity.get(), 600);
        assert_eq!(config.alerts.len(), 2);
        assert_eq!(config.server.health_port, 0);

        let supervisor = config.supervisor_config();
        assert_eq!(supervisor.buffer_capacity.get(), 600);
        assert_eq!(
            supervisor.connection.reconnect.initial_delay,
            Duration::from_millis(250)
        );
        assert_eq!(supervisor.connection.reconnect.max_attempts.get(), 3);
        assert_eq!(
            config.feed_config().stream_url(&config.feed.symbol),
            "wss://stream.binance.com:9443/ws/ethusdt@aggTrade"
        );
    }

    #[test_case("TICKER_BUFFER_CAPACITY", "0" ; "zero buffer")]
    #[test_case("TICKER_BUFFER_CAPACITY", "many" ; "non numeric buffer")]
    #[test_case("TICKER_ALERT_HISTORY_LIMIT", "0" ; "zero history")]
    #[test_case("TICKER_MAX_RECONNECT_ATTEMPTS", "0" ; "zero attempts")]
    #[test_case("TICKER_RECONNECT_JITTER", "1.5" ; "jitter above one")]
    #[test_case("TICKER_RECONNECT_DELAY_MULTIPLIER", "0.5" ; "shrinking backoff")]
    #[test_case("TICKER_RECONNECT_DELAY_INITIAL_MS", "0" ; "zero initial delay")]
    #[test_case("TICKER_CONNECT_TIMEOUT_SECS", "0" ; "zero timeout")]
    #[test_case("TICKER_STREAM_KIND", "depth" ; "unknown kind")]
    #[test_case("TICKER_SYMBOL", "BTC/USDT" ; "bad symbol")]
    #[test_case("TICKER_ALERTS", "BTCUSDT:above:-1" ; "bad alert")]
    #[test_case("TICKER_HEALTH_PORT", "70000" ; "port out of range")]
    fn invalid_values_are_rejected(key: &str, value: &str) {
        assert!(load(&[(key, value)]).is_err());
    }

    #[test]
    fn max_delay_below_initial_is_rejected() {
        let err = load(&[
            ("TICKER_RECONNECT_DELAY_INITIAL_MS", "5000"),
            ("TICKER_RECONNECT_DELAY_MAX_SECS", "1"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "TICKER_RECONNECT_DELAY_MAX_SECS",
                ..
            }
        ));
    }

    #[test]
    fn blank_values_use_defaults() {
        let config = load(&[("TICKER_BUFFER_CAPACITY", "  ")]).unwrap();
        assert_eq!(config.stream.buffer_capacity.get(), 300);
    }
}
