//! Stream Client Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment variables.
//! Credentials are not part of the configuration; they arrive with each login.

use std::time::Duration;

/// Default stock stream host; the feed name is appended.
const STREAM_BASE_URL: &str = "wss://stream.data.alpaca.markets/v2";

/// Market data feed type for Alpaca streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    /// SIP (Securities Information Processor) - Full market data.
    #[default]
    Sip,
    /// IEX (Investors Exchange) - Free tier with limited data.
    Iex,
}

impl DataFeed {
    /// Parse feed type from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "iex" => Self::Iex,
            _ => Self::Sip,
        }
    }

    /// Get the feed name for WebSocket URLs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Iex => "iex",
        }
    }
}

/// Output queue capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Capacity of the subscription acknowledgment queue.
    pub subscriptions_capacity: usize,
    /// Capacity of the trade queue.
    pub trades_capacity: usize,
    /// Capacity of the quote queue.
    pub quotes_capacity: usize,
    /// Capacity of the bar queue.
    pub bars_capacity: usize,
    /// Capacity of the session error queue.
    pub errors_capacity: usize,
    /// Capacity of the fault queue.
    pub faults_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            subscriptions_capacity: 128,
            trades_capacity: 1024,
            quotes_capacity: 4096,
            bars_capacity: 1024,
            errors_capacity: 128,
            faults_capacity: 128,
        }
    }
}

/// Orderly shutdown timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectSettings {
    /// Attempts to send the closure frame.
    pub close_attempts: u32,
    /// Pause between failed send attempts.
    pub close_retry_delay: Duration,
    /// How long to wait for the remote closure acknowledgment.
    pub close_ack_timeout: Duration,
}

impl Default for DisconnectSettings {
    fn default() -> Self {
        Self {
            close_attempts: 10,
            close_retry_delay: Duration::from_secs(1),
            close_ack_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP front end settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Login/health/metrics HTTP port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8080 }
    }
}

/// Symbols subscribed (trades and quotes) right after login.
#[must_use]
pub fn default_initial_symbols() -> Vec<String> {
    ["AAPL", "AMD", "SPY", "QQQ"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Market data feed type.
    pub feed: DataFeed,
    /// Full endpoint override; takes precedence over `feed`.
    pub stream_url: Option<String>,
    /// Output queue capacities.
    pub queues: QueueSettings,
    /// Cap on in-flight decode tasks.
    pub max_concurrent_decodes: usize,
    /// Orderly shutdown timings.
    pub disconnect: DisconnectSettings,
    /// Symbols for the initial subscription.
    pub initial_symbols: Vec<String>,
    /// HTTP front end settings.
    pub server: ServerSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            feed: DataFeed::default(),
            stream_url: None,
            queues: QueueSettings::default(),
            max_concurrent_decodes: 64,
            disconnect: DisconnectSettings::default(),
            initial_symbols: default_initial_symbols(),
            server: ServerSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset or unparseable values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a value parses but is unusable (zero capacity,
    /// zero close attempts, non-websocket URL).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let feed = std::env::var("ALPACA_FEED")
            .map(|s| DataFeed::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let stream_url = std::env::var("ALPACA_STREAM_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let queues = QueueSettings {
            subscriptions_capacity: parse_env_usize(
                "STREAM_CLIENT_SUBSCRIPTIONS_CAPACITY",
                defaults.queues.subscriptions_capacity,
            ),
            trades_capacity: parse_env_usize(
                "STREAM_CLIENT_TRADES_CAPACITY",
                defaults.queues.trades_capacity,
            ),
            quotes_capacity: parse_env_usize(
                "STREAM_CLIENT_QUOTES_CAPACITY",
                defaults.queues.quotes_capacity,
            ),
            bars_capacity: parse_env_usize(
                "STREAM_CLIENT_BARS_CAPACITY",
                defaults.queues.bars_capacity,
            ),
            errors_capacity: parse_env_usize(
                "STREAM_CLIENT_ERRORS_CAPACITY",
                defaults.queues.errors_capacity,
            ),
            faults_capacity: parse_env_usize(
                "STREAM_CLIENT_FAULTS_CAPACITY",
                defaults.queues.faults_capacity,
            ),
        };

        let disconnect = DisconnectSettings {
            close_attempts: parse_env_u32(
                "STREAM_CLIENT_CLOSE_ATTEMPTS",
                defaults.disconnect.close_attempts,
            ),
            close_retry_delay: parse_env_duration_millis(
                "STREAM_CLIENT_CLOSE_RETRY_DELAY_MS",
                defaults.disconnect.close_retry_delay,
            ),
            close_ack_timeout: parse_env_duration_secs(
                "STREAM_CLIENT_CLOSE_ACK_TIMEOUT_SECS",
                defaults.disconnect.close_ack_timeout,
            ),
        };

        let initial_symbols = std::env::var("STREAM_CLIENT_INITIAL_SYMBOLS")
            .map(|s| parse_symbol_list(&s))
            .unwrap_or(defaults.initial_symbols);

        let config = Self {
            feed,
            stream_url,
            queues,
            max_concurrent_decodes: parse_env_usize(
                "STREAM_CLIENT_MAX_CONCURRENT_DECODES",
                defaults.max_concurrent_decodes,
            ),
            disconnect,
            initial_symbols,
            server: ServerSettings {
                http_port: parse_env_u16("STREAM_CLIENT_HTTP_PORT", defaults.server.http_port),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the client unusable.
    ///
    /// # Errors
    ///
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("STREAM_CLIENT_SUBSCRIPTIONS_CAPACITY", self.queues.subscriptions_capacity),
            ("STREAM_CLIENT_TRADES_CAPACITY", self.queues.trades_capacity),
            ("STREAM_CLIENT_QUOTES_CAPACITY", self.queues.quotes_capacity),
            ("STREAM_CLIENT_BARS_CAPACITY", self.queues.bars_capacity),
            ("STREAM_CLIENT_ERRORS_CAPACITY", self.queues.errors_capacity),
            ("STREAM_CLIENT_FAULTS_CAPACITY", self.queues.faults_capacity),
            ("STREAM_CLIENT_MAX_CONCURRENT_DECODES", self.max_concurrent_decodes),
        ];
        if let Some((key, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue {
                key: (*key).to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.disconnect.close_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_CLIENT_CLOSE_ATTEMPTS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let url = self.stream_url();
        if !(url.starts_with("wss://") || url.starts_with("ws://")) {
            return Err(ConfigError::InvalidValue {
                key: "ALPACA_STREAM_URL".to_string(),
                reason: format!("not a websocket URL: {url}"),
            });
        }

        Ok(())
    }

    /// Get the stock stream WebSocket URL.
    #[must_use]
    pub fn stream_url(&self) -> String {
        self.stream_url
            .clone()
            .unwrap_or_else(|| format!("{STREAM_BASE_URL}/{}", self.feed.as_str()))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting parsed but cannot be used.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Environment variable name
        key: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Split a comma-separated symbol list, dropping blanks.
#[must_use]
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
