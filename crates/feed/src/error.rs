use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("Invalid feed configuration for {symbol}: {reason}")]
    InvalidConfig { symbol: String, reason: String },
}
