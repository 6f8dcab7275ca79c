use api_client::CreateOrder;
use chrono::{DateTime, Utc};
use core_types::{OrderRequest, OrderSide, OrderStatus, OrderType};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// An order owned by the broker, as last confirmed by the exchange.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    /// Assigned by the exchange once the create call is acknowledged.
    pub exchange_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// The exchange token `order_type` resolved to at submit time.
    pub exchange_type: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub average_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The create call still has to reach the exchange.
    pub(crate) submit_pending: bool,
    /// A create attempt went unanswered, so the exchange may hold the order already.
    pub(crate) create_unconfirmed: bool,
    pub(crate) create: CreateOrder,
    pub(crate) last_payload: Option<Value>,
    /// Statuses already reported for this order.
    pub(crate) notified: HashSet<OrderStatus>,
}

impl Order {
    pub(crate) fn new(request: &OrderRequest, create: CreateOrder) -> Self {
        let now = Utc::now();
        Self {
            id: request.client_order_id,
            exchange_id: None,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            exchange_type: create.order_type.clone(),
            quantity: request.quantity,
            price: request.price,
            stop_price: request.stop_price,
            status: OrderStatus::Submitted,
            filled: Decimal::ZERO,
            remaining: request.quantity,
            average_price: None,
            created_at: now,
            updated_at: now,
            submit_pending: true,
            create_unconfirmed: false,
            create,
            last_payload: None,
            notified: HashSet::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_submit_pending(&self) -> bool {
        self.submit_pending
    }

    /// The last raw exchange payload this order was reconciled from.
    pub fn last_payload(&self) -> Option<&Value> {
        self.last_payload.as_ref()
    }
}
