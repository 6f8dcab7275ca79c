use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    BackoffConfig, BrokerConfig, Config, Credentials, ExchangeConfig, FeedConfig,
    HeikinAshiConfig, LoggingConfig, MappingConfig, RateLimitConfig, STATUS_RULE_NAMES,
    StatusRuleConfig,
};

/// Loads the application configuration from the `config.toml` file.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from("config.toml")
}

/// Loads and validates the configuration from `path`.
///
/// Environment variables prefixed with `APP__` override file values, so secrets can stay out
/// of the file: `APP__EXCHANGE__CREDENTIALS__SECRET=...`.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}

/// Parses and validates a configuration held in memory as TOML.
pub fn parse_config(toml: &str) -> Result<Config, ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?
        .try_deserialize::<Config>()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{OrderType, Timeframe};
    use serde_json::json;

    const SAMPLE: &str = r#"
        [exchange]
        id = "binance"
        sandbox = true
        max_attempts = 3

        [exchange.rate_limit]
        min_interval_ms = 250

        [broker]
        currency = "BNB"

        [broker.mapping.order_types]
        StopLimit = "a specific stop limit type"

        [broker.mapping.mappings.canceled_order]
        key = "result"
        value = 1

        [[feeds]]
        symbol = "BNB/USDT"
        timeframe = "1m"
        start = "2019-01-01T00:00:00Z"
        ohlcv_limit = 2
        drop_newest = true

        [feeds.fetch_params]
        partial = false
    "#;

    #[test]
    fn parses_full_sample() {
        let config = parse_config(SAMPLE).unwrap();

        assert_eq!(config.exchange.id, "binance");
        assert_eq!(config.exchange.max_attempts, 3);
        assert!(config.exchange.rate_limit.enabled);
        assert_eq!(config.exchange.rate_limit.min_interval_ms, 250);
        assert_eq!(config.broker.currency, "BNB");
        let stop_limit = config
            .broker
            .mapping
            .order_types
            .iter()
            .find(|(name, _)| name.parse::<OrderType>().ok() == Some(OrderType::StopLimit))
            .map(|(_, token)| token.as_str());
        assert_eq!(stop_limit, Some("a specific stop limit type"));
        let rule = &config.broker.mapping.mappings["canceled_order"];
        assert_eq!(rule.key, "result");
        assert_eq!(rule.value.as_i64(), Some(1));

        let feed = &config.feeds[0];
        assert_eq!(feed.timeframe, Timeframe::M1);
        assert_eq!(feed.ohlcv_limit, 2);
        assert!(feed.drop_newest);
        assert_eq!(feed.fetch_params.get("partial"), Some(&json!(false)));
    }

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let config = parse_config("[exchange]\nid = \"kraken\"\n").unwrap();
        assert_eq!(config.exchange.max_attempts, 5);
        assert_eq!(config.broker.currency, "USDT");
        assert!(config.broker.mapping.is_empty());
        assert_eq!(config.broker.closed_order_limit, 1000);
        assert!(config.feeds.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_unknown_order_type_override() {
        let toml = "[exchange]\nid = \"binance\"\n[broker.mapping.order_types]\nIceberg = \"iceberg\"\n";
        assert!(matches!(parse_config(toml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn rejects_unknown_status_rule() {
        let toml = "[exchange]\nid = \"binance\"\n[broker.mapping.mappings.filled_order]\nkey = \"status\"\nvalue = \"filled\"\n";
        assert!(matches!(parse_config(toml), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn rejects_zero_retry_budget() {
        let toml = "[exchange]\nid = \"binance\"\nmax_attempts = 0\n";
        assert!(matches!(parse_config(toml), Err(ConfigError::ValidationError(_))));
    }
}
