use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use core_types::{OrderType, Timeframe};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Names accepted under `[broker.mapping.mappings]`.
pub const STATUS_RULE_NAMES: [&str; 6] = [
    "closed_order",
    "canceled_order",
    "rejected_order",
    "expired_order",
    "open_order",
    "cancel_confirmed",
];

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Rejects configurations that would only fail later, at order or poll time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.id.trim().is_empty() {
            return Err(ConfigError::ValidationError("exchange.id must not be empty".to_string()));
        }
        if self.exchange.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "exchange.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.exchange.backoff.jitter < 0.0 || self.exchange.backoff.jitter > 1.0 {
            return Err(ConfigError::ValidationError(
                "exchange.backoff.jitter must be within [0, 1]".to_string(),
            ));
        }
        for name in self.broker.mapping.order_types.keys() {
            name.parse::<OrderType>().map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        for (name, rule) in &self.broker.mapping.mappings {
            if !STATUS_RULE_NAMES.contains(&name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "unknown mapping rule '{}', expected one of {:?}",
                    name, STATUS_RULE_NAMES
                )));
            }
            if rule.key.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "mapping rule '{}' has an empty key",
                    name
                )));
            }
        }
        for feed in &self.feeds {
            if feed.ohlcv_limit == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "feed '{}' has ohlcv_limit = 0",
                    feed.symbol
                )));
            }
            if let (Some(start), Some(end)) = (feed.start, feed.end) {
                if end <= start {
                    return Err(ConfigError::ValidationError(format!(
                        "feed '{}' ends before it starts",
                        feed.symbol
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Connection settings for the single exchange this process talks to.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange identifier, e.g. "binance". Also selects the exchange-specific mapping hook.
    pub id: String,
    /// Route private calls to the exchange's testnet.
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret: String,
}

impl Credentials {
    pub fn is_present(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum spacing between two consecutive calls on the connection.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    /// Jitter as a fraction of the delay (0.0 to 1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Settings for order handling.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// The account currency used for cash/value snapshots.
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub mapping: MappingConfig,
    /// Log every raw exchange payload at debug level.
    #[serde(default)]
    pub debug: bool,
    /// How many settled orders stay queryable before the oldest are forgotten.
    #[serde(default = "default_closed_order_limit")]
    pub closed_order_limit: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            mapping: MappingConfig::default(),
            debug: false,
            closed_order_limit: default_closed_order_limit(),
        }
    }
}

/// Caller-supplied overrides for the built-in mapping table.
///
/// ```toml
/// [broker.mapping.order_types]
/// Stop = "stop-loss"
///
/// [broker.mapping.mappings.canceled_order]
/// key = "result"
/// value = 1
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingConfig {
    /// Canonical order type name -> exchange token.
    #[serde(default)]
    pub order_types: HashMap<String, String>,
    /// Status rule name -> (key, value) pair.
    #[serde(default)]
    pub mappings: HashMap<String, StatusRuleConfig>,
}

impl MappingConfig {
    pub fn is_empty(&self) -> bool {
        self.order_types.is_empty() && self.mappings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusRuleConfig {
    pub key: String,
    pub value: Value,
}

/// One OHLCV feed polled from the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Unified symbol, e.g. "BNB/USDT".
    pub symbol: String,
    pub timeframe: Timeframe,
    /// First bar to deliver. When absent the feed starts at the current period.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Only used by historical feeds: stop once this time is reached.
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// Maximum bars requested per fetch.
    #[serde(default = "default_ohlcv_limit")]
    pub ohlcv_limit: usize,
    /// Extra exchange-specific parameters for every OHLCV fetch.
    #[serde(default)]
    pub fetch_params: Map<String, Value>,
    /// Drop the newest bar of a batch while its period is still open.
    #[serde(default)]
    pub drop_newest: bool,
    /// Stop after catching up instead of switching to live polling.
    #[serde(default)]
    pub historical: bool,
    #[serde(default)]
    pub heikin_ashi: Option<HeikinAshiConfig>,
    #[serde(default)]
    pub debug: bool,
}

/// Converts delivered bars into Heikin-Ashi candles rounded to the symbol's tick size.
#[derive(Debug, Clone, Deserialize)]
pub struct HeikinAshiConfig {
    pub tick_size: Decimal,
    pub price_digits: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
            file_prefix: default_log_file_prefix(),
        }
    }
}

// --- Default Implementations ---

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_min_interval_ms() -> u64 {
    1_000
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

fn default_jitter() -> f64 {
    0.1
}

fn default_currency() -> String {
    "USDT".to_string()
}

fn default_closed_order_limit() -> usize {
    1000
}

fn default_ohlcv_limit() -> usize {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_prefix() -> String {
    "exchange-bridge".to_string()
}
