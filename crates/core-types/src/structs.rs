use crate::enums::{OrderSide, OrderType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque, exchange-specific request parameters. Passed through untouched.
pub type Params = Map<String, Value>;

/// A single OHLCV bar. `timestamp` is the open time of the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// A request from the strategy engine to place an order, in canonical vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Engine-assigned identity. Doubles as the exchange-side client order id.
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price for `Limit`/`StopLimit`, trigger price for `Stop`.
    pub price: Option<Decimal>,
    /// Trigger price for `StopLimit` orders.
    pub stop_price: Option<Decimal>,
    /// Last known market price, used by exchange rules that depend on it.
    /// When absent and needed, the broker looks it up.
    pub reference_price: Option<Decimal>,
    /// Extra exchange-specific order parameters.
    #[serde(default)]
    pub params: Params,
}

impl OrderRequest {
    pub fn new(symbol: &str, side: OrderSide, order_type: OrderType, quantity: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            reference_price: None,
            params: Params::new(),
        }
    }

    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self::new(symbol, side, OrderType::Market, quantity)
    }

    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self::new(symbol, side, OrderType::Limit, quantity).with_price(price)
    }

    pub fn stop_limit(
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
        limit_price: Decimal,
    ) -> Self {
        let mut request = Self::new(symbol, side, OrderType::StopLimit, quantity).with_price(limit_price);
        request.stop_price = Some(stop_price);
        request
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_reference_price(mut self, price: Decimal) -> Self {
        self.reference_price = Some(price);
        self
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}
