use crate::error::ApiError;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Value, json};

// Using `#[serde(rename_all = "camelCase")]` to automatically map from JSON camelCase to Rust snake_case.

/// An order as returned by `POST`, `GET` and `DELETE /api/v3/order`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    #[serde(default)]
    pub cummulative_quote_qty: Decimal,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub transact_time: Option<i64>,
}

impl OrderResponse {
    /// Re-shapes a raw Binance order into the unified order payload consumed by the mapping layer.
    /// The untouched exchange response is kept under `info`.
    pub fn into_unified(raw: Value, unified_symbol: &str) -> Result<Value, ApiError> {
        let order: OrderResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::Deserialization(format!("order: {}", e)))?;

        let remaining = (order.orig_qty - order.executed_qty).max(Decimal::ZERO);
        let average = if order.executed_qty.is_zero() {
            Value::Null
        } else {
            decimal_value(order.cummulative_quote_qty / order.executed_qty)
        };

        Ok(json!({
            "id": order.order_id.to_string(),
            "clientOrderId": order.client_order_id,
            "symbol": unified_symbol,
            "timestamp": order.transact_time.or(order.time),
            "status": unified_status(&order.status),
            "type": order.order_type.to_ascii_lowercase(),
            "side": order.side.to_ascii_lowercase(),
            "price": decimal_value(order.price),
            "stopPrice": order.stop_price.map(decimal_value),
            "amount": decimal_value(order.orig_qty),
            "filled": decimal_value(order.executed_qty),
            "remaining": decimal_value(remaining),
            "average": average,
            "cost": decimal_value(order.cummulative_quote_qty),
            "info": raw,
        }))
    }
}

/// Maps Binance order states onto the unified vocabulary (`open`, `closed`, `canceled`, ...).
pub fn unified_status(status: &str) -> &'static str {
    match status {
        "NEW" | "PARTIALLY_FILLED" | "PENDING_NEW" => "open",
        "FILLED" => "closed",
        "CANCELED" => "canceled",
        "PENDING_CANCEL" => "canceling",
        "REJECTED" => "rejected",
        "EXPIRED" | "EXPIRED_IN_MATCH" => "expired",
        _ => "unknown",
    }
}

/// `GET /api/v3/account`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<AssetBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl AccountResponse {
    /// Produces `{free: {asset: x}, used: {...}, total: {...}, info: raw}`.
    pub fn into_unified(raw: Value) -> Result<Value, ApiError> {
        let account: AccountResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::Deserialization(format!("account: {}", e)))?;

        let mut free = Map::new();
        let mut used = Map::new();
        let mut total = Map::new();
        for balance in account.balances {
            free.insert(balance.asset.clone(), decimal_value(balance.free));
            used.insert(balance.asset.clone(), decimal_value(balance.locked));
            total.insert(balance.asset, decimal_value(balance.free + balance.locked));
        }

        Ok(json!({ "free": free, "used": used, "total": total, "info": raw }))
    }
}

/// Represents an error response from the Binance API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

// Decimals travel as strings so no precision is lost on the way to the broker.
fn decimal_value(value: Decimal) -> Value {
    Value::String(value.normalize().to_string())
}
