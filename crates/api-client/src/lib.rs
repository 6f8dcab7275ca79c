use crate::auth::sign_request;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use configuration::ExchangeConfig;
use core_types::{Candle, Params};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

mod auth;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod requests;
pub mod responses;

// --- Public API ---
pub use error::{ApiError, ErrorCategory};
pub use requests::{CreateOrder, HttpMethod, OhlcvQuery};
pub use responses::{AccountResponse, ApiErrorResponse, OrderResponse};

/// The unified exchange call surface.
///
/// Order and balance calls return the exchange payload already re-shaped into the unified
/// layout (`id`, `status`, `filled`, `remaining`, ... for orders; `free`/`used`/`total` maps
/// for balances). Interpreting those payloads is the mapping layer's job, not the client's.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Exchange identifier, e.g. "binance".
    fn id(&self) -> &str;

    async fn create_order(&self, order: &CreateOrder) -> Result<Value, ApiError>;

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<Value, ApiError>;

    async fn fetch_order(&self, id: &str, symbol: &str) -> Result<Value, ApiError>;

    /// Looks an order up by the client order id it was created with.
    async fn fetch_order_by_client_id(&self, client_id: &str, symbol: &str) -> Result<Value, ApiError>;

    /// Replaces the open order `id` with `order` and returns the replacement.
    async fn edit_order(&self, id: &str, order: &CreateOrder) -> Result<Value, ApiError>;

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Value>, ApiError>;

    async fn fetch_closed_orders(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, ApiError>;

    /// Open derivative positions. Spot-only venues have none to report.
    async fn fetch_positions(&self, _symbols: &[String]) -> Result<Vec<Value>, ApiError> {
        Err(ApiError::NotSupported(format!("{} has no positions endpoint", self.id())))
    }

    async fn fetch_balance(&self, params: &Params) -> Result<Value, ApiError>;

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>, ApiError>;

    /// Calls an arbitrary private endpoint and returns the decoded body untouched.
    async fn private_call(
        &self,
        method: HttpMethod,
        path: &str,
        params: &Params,
    ) -> Result<Value, ApiError>;
}

const MAINNET_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";
const RECV_WINDOW_MS: &str = "5000";

/// A concrete implementation of `ExchangeApi` for the Binance spot REST API.
#[derive(Clone)]
pub struct BinanceClient {
    client: reqwest::Client,
    /// Private calls go here (testnet in sandbox mode).
    base_url: String,
    /// Market data always comes from mainnet; testnet candles are sparse.
    market_data_url: String,
    api_secret: String,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> Result<Self, ApiError> {
        let base_url = if config.sandbox { TESTNET_URL } else { MAINNET_URL };

        let mut headers = HeaderMap::new();
        if !config.credentials.api_key.is_empty() {
            let key = HeaderValue::from_str(&config.credentials.api_key)
                .map_err(|_| ApiError::Authentication("API key is not a valid header value".to_string()))?;
            headers.insert("X-MBX-APIKEY", key);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            market_data_url: MAINNET_URL.to_string(),
            api_secret: config.credentials.secret.clone(),
        })
    }

    /// Converts a unified symbol ("BNB/USDT", "BTC/USDT:USDT") into a Binance market id ("BNBUSDT").
    pub fn market_id(symbol: &str) -> String {
        let base = symbol.split(':').next().unwrap_or(symbol);
        base.replace('/', "").to_ascii_uppercase()
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: BTreeMap<String, String>,
    ) -> Result<Value, ApiError> {
        if self.api_secret.is_empty() {
            return Err(ApiError::Authentication(format!(
                "{} {} requires API credentials",
                method, path
            )));
        }

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ApiError::InvalidData(e.to_string()))?
            .as_millis();
        params.insert("timestamp".to_string(), timestamp.to_string());
        params.entry("recvWindow".to_string()).or_insert_with(|| RECV_WINDOW_MS.to_string());

        let query_string = serde_qs::to_string(&params)
            .map_err(|e| ApiError::InvalidData(format!("failed to encode query: {}", e)))?;
        let signature = sign_request(&self.api_secret, &query_string);

        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );
        tracing::debug!(%method, path, "signed request");

        let response = self.client.request(method, &url).send().await?;
        Self::decode(response).await
    }

    async fn public_request(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.market_data_url, path);
        tracing::debug!(path, "public request");

        let response = self.client.get(&url).query(params).send().await?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<Value>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            match serde_json::from_str::<ApiErrorResponse>(&text) {
                Ok(body) => Err(ApiError::from_binance(status.as_u16(), body.code, body.msg)),
                // Gateways and load balancers answer with HTML; classify by status alone.
                Err(_) => Err(ApiError::from_binance(status.as_u16(), 0, text)),
            }
        }
    }
}

// Intermediate struct for deserializing klines from the Binance API
#[derive(Deserialize)]
struct RawKline(i64, String, String, String, String, String, i64, String, i64, String, String, String);

impl RawKline {
    fn into_candle(self) -> Result<Candle, ApiError> {
        Ok(Candle {
            timestamp: Utc
                .timestamp_millis_opt(self.0)
                .single()
                .ok_or_else(|| ApiError::InvalidData(format!("Invalid open_time: {}", self.0)))?,
            open: parse_decimal(&self.1)?,
            high: parse_decimal(&self.2)?,
            low: parse_decimal(&self.3)?,
            close: parse_decimal(&self.4)?,
            volume: parse_decimal(&self.5)?,
        })
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw).map_err(|e| ApiError::Deserialization(e.to_string()))
}

/// Renders a JSON parameter as a query-string value.
fn param_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn params_to_query(params: &Params) -> BTreeMap<String, String> {
    params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), param_string(v)))
        .collect()
}

/// Binance order type for a unified token: "stop-loss" -> "STOP_LOSS", "limit" -> "LIMIT".
fn binance_order_type(token: &str) -> String {
    token.trim().replace(['-', ' '], "_").to_ascii_uppercase()
}

/// Order types that rest on the book at a limit price. Binance refuses `price` on the others.
fn takes_limit_price(order_type: &str) -> bool {
    matches!(order_type, "LIMIT" | "STOP_LOSS_LIMIT" | "TAKE_PROFIT_LIMIT" | "LIMIT_MAKER")
}

/// Query parameters of a new order, shared by `order` and `order/cancelReplace`.
fn order_params(order: &CreateOrder) -> BTreeMap<String, String> {
    let order_type = binance_order_type(&order.order_type);

    let mut params = params_to_query(&order.params);
    // The unified client order id is spelled differently on Binance.
    if let Some(client_id) = params.remove("clientOrderId") {
        params.insert("newClientOrderId".to_string(), client_id);
    }
    params.insert("symbol".to_string(), BinanceClient::market_id(&order.symbol));
    params.insert("side".to_string(), order.side.as_str().to_ascii_uppercase());
    params.insert("quantity".to_string(), order.amount.normalize().to_string());
    if takes_limit_price(&order_type) {
        if let Some(price) = order.price {
            params.insert("price".to_string(), price.normalize().to_string());
        }
        // LIMIT_MAKER is post-only and takes no time in force.
        if order_type != "LIMIT_MAKER" {
            params.entry("timeInForce".to_string()).or_insert_with(|| "GTC".to_string());
        }
    }
    params.insert("type".to_string(), order_type);
    params.insert("newOrderRespType".to_string(), "FULL".to_string());
    params
}

fn unified_orders(raw: Value, symbol: Option<&str>, endpoint: &str) -> Result<Vec<Value>, ApiError> {
    let Value::Array(orders) = raw else {
        return Err(ApiError::InvalidData(format!("{} did not return a list", endpoint)));
    };

    orders
        .into_iter()
        .map(|order| {
            // Without a caller symbol, fall back to the raw market id.
            let unified = symbol
                .map(str::to_string)
                .or_else(|| order.get("symbol").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default();
            OrderResponse::into_unified(order, &unified)
        })
        .collect()
}

#[async_trait]
impl ExchangeApi for BinanceClient {
    fn id(&self) -> &str {
        "binance"
    }

    async fn create_order(&self, order: &CreateOrder) -> Result<Value, ApiError> {
        let raw = self
            .signed_request(reqwest::Method::POST, "/api/v3/order", order_params(order))
            .await?;
        OrderResponse::into_unified(raw, &order.symbol)
    }

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<Value, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), Self::market_id(symbol));
        params.insert("orderId".to_string(), id.to_string());

        let raw = self.signed_request(reqwest::Method::DELETE, "/api/v3/order", params).await?;
        OrderResponse::into_unified(raw, symbol)
    }

    async fn fetch_order(&self, id: &str, symbol: &str) -> Result<Value, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), Self::market_id(symbol));
        params.insert("orderId".to_string(), id.to_string());

        let raw = self.signed_request(reqwest::Method::GET, "/api/v3/order", params).await?;
        OrderResponse::into_unified(raw, symbol)
    }

    async fn fetch_order_by_client_id(&self, client_id: &str, symbol: &str) -> Result<Value, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), Self::market_id(symbol));
        params.insert("origClientOrderId".to_string(), client_id.to_string());

        let raw = self.signed_request(reqwest::Method::GET, "/api/v3/order", params).await?;
        OrderResponse::into_unified(raw, symbol)
    }

    async fn edit_order(&self, id: &str, order: &CreateOrder) -> Result<Value, ApiError> {
        let mut params = order_params(order);
        params.insert("cancelOrderId".to_string(), id.to_string());
        params.insert("cancelReplaceMode".to_string(), "STOP_ON_FAILURE".to_string());

        let raw = self
            .signed_request(reqwest::Method::POST, "/api/v3/order/cancelReplace", params)
            .await?;
        let replacement = raw.get("newOrderResponse").cloned().ok_or_else(|| {
            ApiError::InvalidData("cancelReplace response carries no new order".to_string())
        })?;
        OrderResponse::into_unified(replacement, &order.symbol)
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Value>, ApiError> {
        let mut params = BTreeMap::new();
        if let Some(symbol) = symbol {
            params.insert("symbol".to_string(), Self::market_id(symbol));
        }

        let raw = self.signed_request(reqwest::Method::GET, "/api/v3/openOrders", params).await?;
        unified_orders(raw, symbol, "openOrders")
    }

    async fn fetch_closed_orders(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, ApiError> {
        let symbol = symbol.ok_or_else(|| {
            ApiError::NotSupported("binance lists order history per symbol only".to_string())
        })?;
        let mut params = BTreeMap::new();
        params.insert("symbol".to_string(), Self::market_id(symbol));
        if let Some(since) = since {
            params.insert("startTime".to_string(), since.timestamp_millis().to_string());
        }
        if let Some(limit) = limit {
            params.insert("limit".to_string(), limit.to_string());
        }

        let raw = self.signed_request(reqwest::Method::GET, "/api/v3/allOrders", params).await?;
        let orders = unified_orders(raw, Some(symbol), "allOrders")?;
        Ok(orders.into_iter().filter(is_settled).collect())
    }

    async fn fetch_balance(&self, params: &Params) -> Result<Value, ApiError> {
        let raw = self
            .signed_request(reqwest::Method::GET, "/api/v3/account", params_to_query(params))
            .await?;
        AccountResponse::into_unified(raw)
    }

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>, ApiError> {
        let mut params = params_to_query(&query.params);
        params.insert("symbol".to_string(), Self::market_id(&query.symbol));
        params.insert("interval".to_string(), query.timeframe.as_str().to_string());
        if let Some(since) = query.since {
            params.insert("startTime".to_string(), since.timestamp_millis().to_string());
        }
        if let Some(limit) = query.limit {
            params.insert("limit".to_string(), limit.to_string());
        }

        let raw = self.public_request("/api/v3/klines", &params).await?;
        let klines: Vec<RawKline> =
            serde_json::from_value(raw).map_err(|e| ApiError::Deserialization(e.to_string()))?;

        klines.into_iter().map(RawKline::into_candle).collect()
    }

    async fn private_call(
        &self,
        method: HttpMethod,
        path: &str,
        params: &Params,
    ) -> Result<Value, ApiError> {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
        self.signed_request(method.into(), &path, params_to_query(params)).await
    }
}

/// Whether a unified order payload has left the book.
fn is_settled(order: &Value) -> bool {
    !matches!(order.get("status").and_then(Value::as_str), Some("open" | "canceling"))
}
