use gateway::GatewayError;
use mapping::MappingError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Invalid order request: {0}")]
    InvalidRequest(String),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Exchange call failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Order {order_id} was rejected: {source}")]
    OrderRejected { order_id: Uuid, source: GatewayError },

    #[error("Order not tracked by this broker: {0}")]
    UnknownOrder(Uuid),

    #[error("No market price available for {0}")]
    NoMarketPrice(String),
}
