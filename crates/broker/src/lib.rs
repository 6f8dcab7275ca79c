//! # Broker Crate
//!
//! The order reconciliation engine between a strategy engine and a live exchange.
//!
//! ## Architectural Principles
//!
//! - **Exchange as source of truth:** local order state only ever moves when an exchange
//!   payload says so. Cancel races, partial fills and stale snapshots are all resolved by
//!   reading the payload through the `MappingResolver`, never by assumption.
//! - **Exactly-once notifications:** every (order, status) pair is reported once. Partial
//!   fills are the exception and repeat only while the filled amount grows.
//! - **Degraded, not wrong:** when the exchange cannot be reached an order keeps its last
//!   confirmed status. Transient failures never produce a terminal notification.
//!
//! ## Public API
//!
//! - `Broker`: submit, cancel, edit, poll, the position book and the balance cache.
//! - `Order`: the broker's view of one order.
//! - `Position`: net exposure per symbol built from observed fills.
//! - `OrderNotification`: lifecycle events for the engine.
//! - `BrokerError`: the specific error types that can be returned from this crate.

pub mod balance;
pub mod broker;
pub mod error;
pub mod notification;
pub mod order;
pub mod position;

#[cfg(test)]
mod tests;

pub use balance::{BalanceCache, BalanceSnapshot};
pub use broker::{Broker, ReconcileReport};
pub use error::BrokerError;
pub use notification::OrderNotification;
pub use order::Order;
pub use position::{Position, PositionBook};
