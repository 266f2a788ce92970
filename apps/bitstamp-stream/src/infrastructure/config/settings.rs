//! Stream Settings
//!
//! Configuration for the stream binary, loaded from environment variables.
//! Unparseable numeric values fall back to their defaults.

use std::time::Duration;

use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::bitstamp::client::{
    DEFAULT_ERROR_CAPACITY, DEFAULT_EVENT_CAPACITY, DEFAULT_READ_TIMEOUT, DEFAULT_STREAM_URL,
    StreamClientConfig,
};

/// Reconnect backoff settings used by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// Complete stream configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// WebSocket URL.
    pub url: String,
    /// Channels to subscribe on every connection.
    pub channels: SubscriptionSet,
    /// Bound on each frame read.
    pub read_timeout: Duration,
    /// Event queue capacity.
    pub event_capacity: usize,
    /// Error queue capacity.
    pub error_capacity: usize,
    /// Feed errors in a row before the supervisor recreates the client.
    pub max_consecutive_errors: u32,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

/// Default consecutive error threshold.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Default Prometheus port.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

impl StreamSettings {
    /// Settings for `channels` with every other field at its default.
    #[must_use]
    pub fn new(channels: SubscriptionSet) -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            channels,
            read_timeout: DEFAULT_READ_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            error_capacity: DEFAULT_ERROR_CAPACITY,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            reconnect: ReconnectSettings::default(),
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BITSTAMP_CHANNELS` is missing or names no
    /// channel.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_channels = lookup("BITSTAMP_CHANNELS")
            .ok_or_else(|| ConfigError::MissingEnvVar("BITSTAMP_CHANNELS".to_string()))?;
        let channels = parse_channels(&raw_channels);
        if channels.is_empty() {
            return Err(ConfigError::EmptyValue("BITSTAMP_CHANNELS".to_string()));
        }

        let defaults = Self::new(SubscriptionSet::new());
        let env = EnvReader { lookup: &lookup };

        let url = lookup("BITSTAMP_WS_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.url);

        let reconnect = ReconnectSettings {
            delay_initial: env.duration_millis(
                "BITSTAMP_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect.delay_initial,
            ),
            delay_max: env.duration_secs(
                "BITSTAMP_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect.delay_max,
            ),
            delay_multiplier: env.parse(
                "BITSTAMP_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect.delay_multiplier,
            ),
            max_attempts: env.parse(
                "BITSTAMP_MAX_RECONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
        };

        Ok(Self {
            url,
            channels,
            read_timeout: env.duration_secs("BITSTAMP_READ_TIMEOUT_SECS", defaults.read_timeout),
            event_capacity: env.parse("BITSTAMP_EVENT_CAPACITY", defaults.event_capacity),
            error_capacity: env.parse("BITSTAMP_ERROR_CAPACITY", defaults.error_capacity),
            max_consecutive_errors: env.parse(
                "BITSTAMP_MAX_CONSECUTIVE_ERRORS",
                defaults.max_consecutive_errors,
            ),
            reconnect,
            metrics_port: env.parse("BITSTAMP_METRICS_PORT", defaults.metrics_port),
        })
    }

    /// Client options derived from these settings.
    #[must_use]
    pub fn client_config(&self) -> StreamClientConfig {
        StreamClientConfig::new(self.url.clone())
            .with_read_timeout(self.read_timeout)
            .with_event_capacity(self.event_capacity)
            .with_error_capacity(self.error_capacity)
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

/// Split a comma-separated channel list, dropping blanks and duplicates.
#[must_use]
pub fn parse_channels(raw: &str) -> SubscriptionSet {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn channels_are_required() {
        let err = StreamSettings::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "BITSTAMP_CHANNELS"));
    }

    #[test]
    fn blank_channel_list_is_rejected() {
        let err = StreamSettings::from_lookup(lookup_from(&[("BITSTAMP_CHANNELS", " , ,")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings =
            StreamSettings::from_lookup(lookup_from(&[("BITSTAMP_CHANNELS", "live_trades_btcusd")]))
                .unwrap();

        assert_eq!(settings.url, "wss://ws.bitstamp.net");
        assert_eq!(settings.read_timeout, Duration::from_secs(30));
        assert_eq!(settings.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert_eq!(settings.error_capacity, DEFAULT_ERROR_CAPACITY);
        assert_eq!(settings.max_consecutive_errors, 5);
        assert_eq!(settings.metrics_port, 9090);
        assert_eq!(settings.reconnect, ReconnectSettings::default());
        assert_eq!(settings.channels.as_slice(), ["live_trades_btcusd"]);
    }

    #[test]
    fn overrides_are_read() {
        let settings = StreamSettings::from_lookup(lookup_from(&[
            ("BITSTAMP_CHANNELS", "a,b"),
            ("BITSTAMP_WS_URL", "ws://127.0.0.1:9000"),
            ("BITSTAMP_READ_TIMEOUT_SECS", "5"),
            ("BITSTAMP_EVENT_CAPACITY", "16"),
            ("BITSTAMP_ERROR_CAPACITY", "4"),
            ("BITSTAMP_MAX_CONSECUTIVE_ERRORS", "2"),
            ("BITSTAMP_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("BITSTAMP_RECONNECT_DELAY_MAX_SECS", "8"),
            ("BITSTAMP_RECONNECT_DELAY_MULTIPLIER", "1.5"),
            ("BITSTAMP_MAX_RECONNECT_ATTEMPTS", "7"),
            ("BITSTAMP_METRICS_PORT", "0"),
        ]))
        .unwrap();

        assert_eq!(settings.url, "ws://127.0.0.1:9000");
        assert_eq!(settings.read_timeout, Duration::from_secs(5));
        assert_eq!(settings.event_capacity, 16);
        assert_eq!(settings.error_capacity, 4);
        assert_eq!(settings.max_consecutive_errors, 2);
        assert_eq!(settings.reconnect.delay_initial, Duration::from_millis(250));
        assert_eq!(settings.reconnect.delay_max, Duration::from_secs(8));
        assert!((settings.reconnect.delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(settings.reconnect.max_attempts, 7);
        assert_eq!(settings.metrics_port, 0);
    }

    #[test]
    fn unparseable_values_fall_back() {
        let settings = StreamSettings::from_lookup(lookup_from(&[
            ("BITSTAMP_CHANNELS", "a"),
            ("BITSTAMP_READ_TIMEOUT_SECS", "soon"),
            ("BITSTAMP_METRICS_PORT", "99999"),
            ("BITSTAMP_WS_URL", "  "),
        ]))
        .unwrap();

        assert_eq!(settings.read_timeout, DEFAULT_READ_TIMEOUT);
        assert_eq!(settings.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(settings.url, DEFAULT_STREAM_URL);
    }

    #[test]
    fn channel_list_is_trimmed_and_deduplicated() {
        let channels = parse_channels(" live_trades_btcusd, order_book_ethusd ,live_trades_btcusd,");
        assert_eq!(
            channels.as_slice(),
            ["live_trades_btcusd", "order_book_ethusd"]
        );
    }

    #[test]
    fn client_config_mirrors_settings() {
        let mut settings = StreamSettings::new(parse_channels("a"));
        settings.read_timeout = Duration::from_secs(3);
        settings.event_capacity = 8;

        let config = settings.client_config();
        assert_eq!(config.url, DEFAULT_STREAM_URL);
        assert_eq!(config.read_timeout, Duration::from_secs(3));
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.error_capacity, DEFAULT_ERROR_CAPACITY);
    }
}
