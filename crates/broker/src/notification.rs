use crate::order::Order;
use chrono::{DateTime, Utc};
use core_types::OrderStatus;
use gateway::GatewayError;
use rust_decimal::Decimal;
use uuid::Uuid;

/// A canonical lifecycle event for the engine. At most one per (order, status), except
/// `PartiallyFilled`, which repeats whenever the filled amount grows.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderNotification {
    pub order_id: Uuid,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub average_price: Option<Decimal>,
    /// Set on rejections caused by an exchange error.
    pub error: Option<GatewayError>,
    pub timestamp: DateTime<Utc>,
}

impl OrderNotification {
    pub(crate) fn for_order(order: &Order, error: Option<GatewayError>) -> Self {
        Self {
            order_id: order.id,
            exchange_order_id: order.exchange_id.clone(),
            status: order.status,
            filled: order.filled,
            remaining: order.remaining,
            average_price: order.average_price,
            error,
            timestamp: Utc::now(),
        }
    }
}
