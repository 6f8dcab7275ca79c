use std::fmt;
use thiserror::Error;

/// Stable classification of exchange failures, independent of the exchange's own codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Throttled,
    Server,
    Authentication,
    InvalidRequest,
    InsufficientFunds,
    OrderNotFound,
    /// The client order id was already used; the order may exist on the exchange.
    DuplicateOrder,
    BadResponse,
    Unsupported,
}

impl ErrorCategory {
    /// Transient failures are worth retrying; everything else fails fast.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Throttled | ErrorCategory::Server
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited by the exchange: {0}")]
    Throttled(String),

    #[error("Exchange server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Duplicate client order id: {0}")]
    DuplicateOrder(String),

    #[error("The exchange rejected the request ({code}): {message}")]
    InvalidRequest { code: i64, message: String },

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl ApiError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Network(_) | ApiError::Timeout => ErrorCategory::Network,
            ApiError::Throttled(_) => ErrorCategory::Throttled,
            ApiError::Server { .. } => ErrorCategory::Server,
            ApiError::Authentication(_) => ErrorCategory::Authentication,
            ApiError::InsufficientFunds(_) => ErrorCategory::InsufficientFunds,
            ApiError::OrderNotFound(_) => ErrorCategory::OrderNotFound,
            ApiError::DuplicateOrder(_) => ErrorCategory::DuplicateOrder,
            ApiError::InvalidRequest { .. } => ErrorCategory::InvalidRequest,
            ApiError::Deserialization(_) | ApiError::InvalidData(_) => ErrorCategory::BadResponse,
            ApiError::NotSupported(_) => ErrorCategory::Unsupported,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category().is_transient()
    }

    /// Classifies a Binance error body (`{"code": -2010, "msg": "..."}`) together with its HTTP status.
    pub fn from_binance(status: u16, code: i64, message: String) -> Self {
        match (status, code) {
            (429 | 418, _) | (_, -1003) => ApiError::Throttled(message),
            (500..=599, _) | (_, -1001) => ApiError::Server { status, message },
            (401, _) | (_, -2014 | -2015 | -1022) => ApiError::Authentication(message),
            (_, -2011 | -2013) => ApiError::OrderNotFound(message),
            (_, -2010) if message.to_ascii_lowercase().contains("insufficient") => {
                ApiError::InsufficientFunds(message)
            }
            (_, -2010) if message.to_ascii_lowercase().contains("duplicate") => {
                ApiError::DuplicateOrder(message)
            }
            _ => ApiError::InvalidRequest { code, message },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Deserialization(err.to_string())
        } else if let Some(status) = err.status() {
            if status.is_server_error() {
                ApiError::Server { status: status.as_u16(), message: err.to_string() }
            } else {
                ApiError::InvalidRequest { code: i64::from(status.as_u16()), message: err.to_string() }
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
