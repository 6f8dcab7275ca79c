use chrono::{DateTime, Utc};
use core_types::{OrderSide, Params, Timeframe};
use rust_decimal::Decimal;
use std::fmt;

/// A create-order call expressed in exchange vocabulary: the order type is already
/// the exchange token produced by the mapping layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrder {
    pub symbol: String,
    pub order_type: String,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub params: Params,
}

/// An OHLCV window request.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Earliest bar open time to return. `None` asks for the most recent bars.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub params: Params,
}

/// HTTP verb for raw private endpoint calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(verb)
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}
