use crate::error::MappingError;
use core_types::{OrderRequest, OrderSide, OrderStatus, OrderType, Params};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What an exchange hook may look at when choosing an order type token.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderContext {
    pub order_type: OrderType,
    pub side: OrderSide,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    /// Last traded price, when known.
    pub market_price: Option<Decimal>,
}

impl OrderContext {
    pub fn new(order_type: OrderType, side: OrderSide) -> Self {
        Self { order_type, side, price: None, stop_price: None, market_price: None }
    }

    pub fn from_request(request: &OrderRequest) -> Self {
        Self {
            order_type: request.order_type,
            side: request.side,
            price: request.price,
            stop_price: request.stop_price,
            market_price: request.reference_price,
        }
    }

    pub fn with_market_price(mut self, price: Decimal) -> Self {
        self.market_price = Some(price);
        self
    }
}

/// Per-exchange customisation consulted before any mapping table.
///
/// Every method defaults to "no opinion", so a hook only implements what its exchange needs.
pub trait ExchangeOverride: Send + Sync {
    /// `Ok(None)` falls through to the mapping tables.
    fn order_type(&self, _ctx: &OrderContext) -> Result<Option<String>, MappingError> {
        Ok(None)
    }

    /// `None` falls through to the status rules.
    fn detect_status(&self, _payload: &Value) -> Option<OrderStatus> {
        None
    }

    /// Whether `order_type()` needs `OrderContext::market_price` for this order type.
    fn requires_market_price(&self, _order_type: OrderType) -> bool {
        false
    }

    /// Extra create-order parameters, merged over the caller's own.
    fn order_params(&self, _ctx: &OrderContext) -> Params {
        Params::new()
    }
}

/// Binance spot: stop orders are `stop-loss`, and stop-limit orders split into
/// `STOP_LOSS_LIMIT` / `TAKE_PROFIT_LIMIT` depending on where the trigger sits
/// relative to the market.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceOverride;

impl ExchangeOverride for BinanceOverride {
    fn order_type(&self, ctx: &OrderContext) -> Result<Option<String>, MappingError> {
        match ctx.order_type {
            OrderType::Stop => Ok(Some("stop-loss".to_string())),
            OrderType::StopLimit => {
                let stop = ctx.stop_price.ok_or(MappingError::MissingPrice {
                    order_type: ctx.order_type,
                    field: "stop price",
                })?;
                let market = ctx.market_price.ok_or(MappingError::MissingPrice {
                    order_type: ctx.order_type,
                    field: "market price",
                })?;
                let below_market = stop < market;
                let token = match (ctx.side, below_market) {
                    (OrderSide::Sell, true) | (OrderSide::Buy, false) => "STOP_LOSS_LIMIT",
                    (OrderSide::Sell, false) | (OrderSide::Buy, true) => "TAKE_PROFIT_LIMIT",
                };
                Ok(Some(token.to_string()))
            }
            _ => Ok(None),
        }
    }

    fn requires_market_price(&self, order_type: OrderType) -> bool {
        order_type == OrderType::StopLimit
    }

    fn order_params(&self, ctx: &OrderContext) -> Params {
        let trigger = match ctx.order_type {
            OrderType::StopLimit => ctx.stop_price,
            OrderType::Stop => ctx.stop_price.or(ctx.price),
            _ => None,
        };

        let mut params = Params::new();
        if let Some(trigger) = trigger {
            params.insert("stopPrice".to_string(), Value::String(trigger.normalize().to_string()));
        }
        params
    }
}

/// Exchange hooks keyed by exchange id.
#[derive(Clone, Default)]
pub struct OverrideRegistry {
    hooks: HashMap<String, Arc<dyn ExchangeOverride>>,
}

impl OverrideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every hook this crate ships.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("binance", Arc::new(BinanceOverride));
        registry
    }

    pub fn register(&mut self, exchange_id: &str, hook: Arc<dyn ExchangeOverride>) {
        self.hooks.insert(exchange_id.to_ascii_lowercase(), hook);
    }

    pub fn get(&self, exchange_id: &str) -> Option<Arc<dyn ExchangeOverride>> {
        self.hooks.get(&exchange_id.to_ascii_lowercase()).cloned()
    }
}
