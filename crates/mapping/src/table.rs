use crate::error::MappingError;
use crate::payload::{value_at, values_match};
use configuration::MappingConfig;
use core_types::{OrderStatus, OrderType};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The status rules a mapping table can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleName {
    ClosedOrder,
    CanceledOrder,
    RejectedOrder,
    ExpiredOrder,
    OpenOrder,
    /// Only consulted for cancel responses.
    CancelConfirmed,
}

impl RuleName {
    /// Terminal rules in the order they are evaluated.
    pub const TERMINAL: [RuleName; 4] = [
        RuleName::ClosedOrder,
        RuleName::CanceledOrder,
        RuleName::RejectedOrder,
        RuleName::ExpiredOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleName::ClosedOrder => "closed_order",
            RuleName::CanceledOrder => "canceled_order",
            RuleName::RejectedOrder => "rejected_order",
            RuleName::ExpiredOrder => "expired_order",
            RuleName::OpenOrder => "open_order",
            RuleName::CancelConfirmed => "cancel_confirmed",
        }
    }

    /// The canonical status a matching rule stands for.
    pub fn status(&self) -> OrderStatus {
        match self {
            RuleName::ClosedOrder => OrderStatus::Filled,
            RuleName::CanceledOrder | RuleName::CancelConfirmed => OrderStatus::Canceled,
            RuleName::RejectedOrder => OrderStatus::Rejected,
            RuleName::ExpiredOrder => OrderStatus::Expired,
            RuleName::OpenOrder => OrderStatus::Accepted,
        }
    }
}

impl fmt::Display for RuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleName {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed_order" => Ok(RuleName::ClosedOrder),
            "canceled_order" => Ok(RuleName::CanceledOrder),
            "rejected_order" => Ok(RuleName::RejectedOrder),
            "expired_order" => Ok(RuleName::ExpiredOrder),
            "open_order" => Ok(RuleName::OpenOrder),
            "cancel_confirmed" => Ok(RuleName::CancelConfirmed),
            _ => Err(MappingError::UnknownRule(s.to_string())),
        }
    }
}

/// A payload matches when the value at `key` equals `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRule {
    pub key: String,
    pub value: Value,
}

impl StatusRule {
    pub fn new(key: &str, value: impl Into<Value>) -> Self {
        Self { key: key.to_string(), value: value.into() }
    }

    pub fn matches(&self, payload: &Value) -> bool {
        value_at(payload, &self.key).is_some_and(|actual| values_match(actual, &self.value))
    }
}

/// One layer of exchange vocabulary. Entries absent from a layer fall through to the next one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    order_types: HashMap<OrderType, String>,
    status_rules: HashMap<RuleName, StatusRule>,
}

impl MappingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The vocabulary of the unified REST client, used when nothing else matches.
    pub fn builtin() -> Self {
        Self::empty()
            .with_order_type(OrderType::Market, "market")
            .with_order_type(OrderType::Limit, "limit")
            .with_order_type(OrderType::Stop, "stop")
            .with_order_type(OrderType::StopLimit, "stop limit")
            .with_rule(RuleName::ClosedOrder, StatusRule::new("status", "closed"))
            .with_rule(RuleName::CanceledOrder, StatusRule::new("status", "canceled"))
            .with_rule(RuleName::RejectedOrder, StatusRule::new("status", "rejected"))
            .with_rule(RuleName::ExpiredOrder, StatusRule::new("status", "expired"))
            .with_rule(RuleName::OpenOrder, StatusRule::new("status", "open"))
            .with_rule(RuleName::CancelConfirmed, StatusRule::new("status", "canceled"))
    }

    /// Builds a caller override layer from the `[broker.mapping]` config section.
    pub fn from_config(config: &MappingConfig) -> Result<Self, MappingError> {
        let mut table = Self::empty();
        for (name, token) in &config.order_types {
            let order_type = name
                .parse::<OrderType>()
                .map_err(|_| MappingError::InvalidOrderType(name.clone()))?;
            table.order_types.insert(order_type, token.clone());
        }
        for (name, rule) in &config.mappings {
            let rule_name = name.parse::<RuleName>()?;
            table.status_rules.insert(rule_name, StatusRule::new(&rule.key, rule.value.clone()));
        }
        Ok(table)
    }

    pub fn with_order_type(mut self, order_type: OrderType, token: &str) -> Self {
        self.order_types.insert(order_type, token.to_string());
        self
    }

    pub fn with_rule(mut self, name: RuleName, rule: StatusRule) -> Self {
        self.status_rules.insert(name, rule);
        self
    }

    pub fn order_type(&self, order_type: OrderType) -> Option<&str> {
        self.order_types.get(&order_type).map(String::as_str)
    }

    pub fn rule(&self, name: RuleName) -> Option<&StatusRule> {
        self.status_rules.get(&name)
    }

    pub fn is_empty(&self) -> bool {
        self.order_types.is_empty() && self.status_rules.is_empty()
    }
}
