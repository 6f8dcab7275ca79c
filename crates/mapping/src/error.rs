use core_types::OrderType;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("No exchange order type is mapped for {0}")]
    UnmappedType(OrderType),

    #[error("Unknown status rule '{0}'")]
    UnknownRule(String),

    #[error("Invalid order type name in mapping table: {0}")]
    InvalidOrderType(String),

    #[error("{order_type} orders need a {field} to resolve the exchange order type")]
    MissingPrice {
        order_type: OrderType,
        field: &'static str,
    },
}
