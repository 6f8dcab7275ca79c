//! # Gateway Crate
//!
//! Every outbound exchange call goes through a [`Gateway`]. It enforces a minimum spacing
//! between calls on the same connection, retries transient failures with exponential
//! backoff up to a fixed attempt budget, and fails fast on everything else.
//!
//! One `Gateway` wraps one exchange connection; the broker and any number of feeds share it
//! behind an `Arc`. Calls are serialised on the connection, so spacing holds across callers.

pub mod backoff;
pub mod error;

pub use backoff::ExponentialBackoff;
pub use error::{GatewayError, GatewayErrorKind};

use api_client::{ApiError, CreateOrder, ExchangeApi, HttpMethod, OhlcvQuery};
use chrono::{DateTime, Utc};
use configuration::ExchangeConfig;
use core_types::{Candle, Params};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Retry and spacing parameters for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per call, the first one included.
    pub max_attempts: u32,
    /// `None` disables rate-limit spacing.
    pub min_interval: Option<Duration>,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_interval: config
                .rate_limit
                .enabled
                .then(|| Duration::from_millis(config.rate_limit.min_interval_ms)),
            backoff_base: Duration::from_millis(config.backoff.base_ms),
            backoff_max: Duration::from_millis(config.backoff.max_ms),
            jitter: config.backoff.jitter,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_base, self.backoff_max, self.jitter)
    }
}

pub struct Gateway {
    exchange: Arc<dyn ExchangeApi>,
    policy: RetryPolicy,
    /// When the previous attempt on this connection was issued.
    last_call: Mutex<Option<Instant>>,
}

impl Gateway {
    pub fn new(exchange: Arc<dyn ExchangeApi>, policy: RetryPolicy) -> Self {
        Self { exchange, policy, last_call: Mutex::new(None) }
    }

    pub fn from_config(config: &ExchangeConfig, exchange: Arc<dyn ExchangeApi>) -> Self {
        Self::new(exchange, RetryPolicy::from_config(config))
    }

    pub fn exchange_id(&self) -> &str {
        self.exchange.id()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `f` under the retry policy.
    ///
    /// `f` is invoked once per attempt and must build a fresh request each time.
    pub async fn call<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut backoff = self.policy.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.attempt(&mut f).await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(operation, attempts, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(source) if !source.is_transient() => {
                    tracing::warn!(operation, error = %source, "call failed, not retrying");
                    return Err(GatewayError::Fatal { operation, attempts, source });
                }
                Err(source) if attempts >= self.policy.max_attempts => {
                    tracing::error!(operation, attempts, error = %source, "retry budget exhausted");
                    return Err(GatewayError::Transient { operation, attempts, source });
                }
                Err(source) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %source,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One spaced attempt. The connection stays locked until the exchange answers.
    async fn attempt<T, F, Fut>(&self, f: &mut F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut last_call = self.last_call.lock().await;

        if let (Some(interval), Some(previous)) = (self.policy.min_interval, *last_call) {
            let ready_at = previous + interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last_call = Some(Instant::now());
        f().await
    }

    pub async fn create_order(&self, order: &CreateOrder) -> Result<Value, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("create_order", move || exchange.create_order(order)).await
    }

    pub async fn cancel_order(&self, id: &str, symbol: &str) -> Result<Value, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("cancel_order", move || exchange.cancel_order(id, symbol)).await
    }

    pub async fn fetch_order(&self, id: &str, symbol: &str) -> Result<Value, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("fetch_order", move || exchange.fetch_order(id, symbol)).await
    }

    pub async fn fetch_order_by_client_id(
        &self,
        client_id: &str,
        symbol: &str,
    ) -> Result<Value, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("fetch_order_by_client_id", move || {
            exchange.fetch_order_by_client_id(client_id, symbol)
        })
        .await
    }

    pub async fn edit_order(&self, id: &str, order: &CreateOrder) -> Result<Value, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("edit_order", move || exchange.edit_order(id, order)).await
    }

    pub async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Value>, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("fetch_open_orders", move || exchange.fetch_open_orders(symbol)).await
    }

    pub async fn fetch_closed_orders(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("fetch_closed_orders", move || exchange.fetch_closed_orders(symbol, since, limit))
            .await
    }

    pub async fn fetch_positions(&self, symbols: &[String]) -> Result<Vec<Value>, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("fetch_positions", move || exchange.fetch_positions(symbols)).await
    }

    pub async fn fetch_balance(&self, params: &Params) -> Result<Value, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("fetch_balance", move || exchange.fetch_balance(params)).await
    }

    pub async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("fetch_ohlcv", move || exchange.fetch_ohlcv(query)).await
    }

    /// Escape hatch for private endpoints without a typed wrapper. The payload is returned as-is.
    pub async fn raw_call(
        &self,
        method: HttpMethod,
        path: &str,
        params: &Params,
    ) -> Result<Value, GatewayError> {
        let exchange: &dyn ExchangeApi = self.exchange.as_ref();
        self.call("raw_call", move || exchange.private_call(method, path, params)).await
    }
}
