use crate::error::MappingError;
use crate::hooks::{ExchangeOverride, OrderContext, OverrideRegistry};
use crate::payload::decimal_at;
use crate::table::{MappingTable, RuleName, StatusRule};
use core_types::{OrderStatus, OrderType, Params};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;

/// Resolves canonical vocabulary against one exchange.
///
/// Lookup order is the exchange hook, then the caller's override table, then the built-in
/// table. Precedence is applied at lookup time, so swapping the override snapshot takes
/// effect on the next call.
#[derive(Clone)]
pub struct MappingResolver {
    exchange_id: String,
    builtin: Arc<MappingTable>,
    overrides: Arc<MappingTable>,
    hook: Option<Arc<dyn ExchangeOverride>>,
}

impl MappingResolver {
    /// A resolver with the registry's hook for `exchange_id` (if any) and no caller overrides.
    pub fn new(exchange_id: &str, registry: &OverrideRegistry) -> Self {
        Self {
            exchange_id: exchange_id.to_string(),
            builtin: Arc::new(MappingTable::builtin()),
            overrides: Arc::new(MappingTable::empty()),
            hook: registry.get(exchange_id),
        }
    }

    pub fn with_overrides(mut self, overrides: MappingTable) -> Self {
        self.set_overrides(overrides);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn ExchangeOverride>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Replaces the caller override layer. In-flight lookups keep the snapshot they started with.
    pub fn set_overrides(&mut self, overrides: MappingTable) {
        tracing::debug!(exchange = %self.exchange_id, "mapping overrides replaced");
        self.overrides = Arc::new(overrides);
    }

    pub fn overrides(&self) -> Arc<MappingTable> {
        Arc::clone(&self.overrides)
    }

    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }

    pub fn to_exchange_type(&self, ctx: &OrderContext) -> Result<String, MappingError> {
        if let Some(hook) = &self.hook {
            if let Some(token) = hook.order_type(ctx)? {
                return Ok(token);
            }
        }

        self.overrides
            .order_type(ctx.order_type)
            .or_else(|| self.builtin.order_type(ctx.order_type))
            .map(str::to_string)
            .ok_or(MappingError::UnmappedType(ctx.order_type))
    }

    /// Whether resolving `order_type` needs a market price in the context.
    pub fn requires_market_price(&self, order_type: OrderType) -> bool {
        self.hook.as_ref().is_some_and(|hook| hook.requires_market_price(order_type))
    }

    /// Extra create-order parameters contributed by the exchange hook.
    pub fn order_params(&self, ctx: &OrderContext) -> Params {
        self.hook.as_ref().map(|hook| hook.order_params(ctx)).unwrap_or_default()
    }

    /// The effective rule for `name` after override precedence.
    pub fn rule(&self, name: RuleName) -> Option<&StatusRule> {
        self.overrides.rule(name).or_else(|| self.builtin.rule(name))
    }

    /// Derives the canonical status from an exchange payload.
    ///
    /// Terminal rules are checked before the open rule. `None` means the payload matched
    /// nothing and the status is unknown.
    pub fn detect_status(&self, payload: &Value) -> Option<OrderStatus> {
        if let Some(status) = self.hook.as_ref().and_then(|hook| hook.detect_status(payload)) {
            return Some(status);
        }

        for name in RuleName::TERMINAL {
            if self.rule(name).is_some_and(|rule| rule.matches(payload)) {
                return Some(name.status());
            }
        }

        if self.rule(RuleName::OpenOrder).is_some_and(|rule| rule.matches(payload)) {
            let filled = decimal_at(payload, "filled").unwrap_or(Decimal::ZERO);
            return Some(if filled > Decimal::ZERO {
                OrderStatus::PartiallyFilled
            } else {
                OrderStatus::Accepted
            });
        }

        None
    }

    /// True when a cancel response confirms the cancellation.
    pub fn confirms_cancel(&self, payload: &Value) -> bool {
        self.rule(RuleName::CancelConfirmed).is_some_and(|rule| rule.matches(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::OrderSide;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn plain() -> MappingResolver {
        MappingResolver::new("kraken", &OverrideRegistry::with_defaults())
    }

    fn binance() -> MappingResolver {
        MappingResolver::new("binance", &OverrideRegistry::with_defaults())
    }

    #[test]
    fn builtin_order_types_resolve() {
        let resolver = plain();
        let ctx = OrderContext::new(OrderType::Limit, OrderSide::Buy);
        assert_eq!(resolver.to_exchange_type(&ctx).unwrap(), "limit");
    }

    #[test]
    fn unmapped_type_is_an_error() {
        let resolver = plain();
        let ctx = OrderContext::new(OrderType::StopTrail, OrderSide::Sell);
        assert_eq!(
            resolver.to_exchange_type(&ctx),
            Err(MappingError::UnmappedType(OrderType::StopTrail))
        );
    }

    #[test]
    fn override_table_replaces_builtin_entry_only() {
        let resolver = plain().with_overrides(
            MappingTable::empty().with_order_type(OrderType::StopLimit, "a specific stop limit type"),
        );

        let stop_limit = OrderContext::new(OrderType::StopLimit, OrderSide::Buy);
        let market = OrderContext::new(OrderType::Market, OrderSide::Buy);
        assert_eq!(resolver.to_exchange_type(&stop_limit).unwrap(), "a specific stop limit type");
        assert_eq!(resolver.to_exchange_type(&market).unwrap(), "market");
    }

    #[test]
    fn hook_wins_over_override_table() {
        let resolver = binance()
            .with_overrides(MappingTable::empty().with_order_type(OrderType::Stop, "stop-market"));
        let ctx = OrderContext::new(OrderType::Stop, OrderSide::Sell);
        assert_eq!(resolver.to_exchange_type(&ctx).unwrap(), "stop-loss");

        // Types the hook has no opinion on fall through.
        let ctx = OrderContext::new(OrderType::Limit, OrderSide::Sell);
        assert_eq!(resolver.to_exchange_type(&ctx).unwrap(), "limit");
    }

    #[test]
    fn binance_sell_stop_limit_below_market_is_stop_loss_limit() {
        let resolver = binance();
        assert!(resolver.requires_market_price(OrderType::StopLimit));
        assert!(!resolver.requires_market_price(OrderType::Limit));

        let mut ctx = OrderContext::new(OrderType::StopLimit, OrderSide::Sell).with_market_price(dec!(300));
        ctx.stop_price = Some(dec!(290));
        ctx.price = Some(dec!(289));
        assert_eq!(resolver.to_exchange_type(&ctx).unwrap(), "STOP_LOSS_LIMIT");
        assert_eq!(resolver.order_params(&ctx).get("stopPrice"), Some(&json!("290")));
    }

    #[test]
    fn detects_statuses_with_builtin_rules() {
        let resolver = plain();
        assert_eq!(resolver.detect_status(&json!({ "status": "closed" })), Some(OrderStatus::Filled));
        assert_eq!(resolver.detect_status(&json!({ "status": "canceled" })), Some(OrderStatus::Canceled));
        assert_eq!(resolver.detect_status(&json!({ "status": "expired" })), Some(OrderStatus::Expired));
        assert_eq!(resolver.detect_status(&json!({ "status": "rejected" })), Some(OrderStatus::Rejected));
        assert_eq!(
            resolver.detect_status(&json!({ "status": "open", "filled": "0" })),
            Some(OrderStatus::Accepted)
        );
        assert_eq!(
            resolver.detect_status(&json!({ "status": "open", "filled": "0.4" })),
            Some(OrderStatus::PartiallyFilled)
        );
        assert_eq!(resolver.detect_status(&json!({ "status": "weird" })), None);
        assert_eq!(resolver.detect_status(&json!({})), None);
    }

    #[test]
    fn terminal_rule_beats_partial_fill() {
        let resolver = plain().with_overrides(
            MappingTable::empty().with_rule(RuleName::OpenOrder, StatusRule::new("state", "live")),
        );
        let payload = json!({ "status": "closed", "state": "live", "filled": "1" });

        assert_eq!(resolver.detect_status(&payload), Some(OrderStatus::Filled));
    }

    #[test]
    fn overridden_cancel_rule_uses_numeric_result() {
        let resolver = plain().with_overrides(
            MappingTable::empty()
                .with_rule(RuleName::CancelConfirmed, StatusRule::new("result", 1)),
        );
        assert!(resolver.confirms_cancel(&json!({ "result": 1 })));
        assert!(!resolver.confirms_cancel(&json!({ "status": "canceled" })));
        assert!(!resolver.confirms_cancel(&json!({ "result": 0 })));
    }

    #[test]
    fn dotted_rule_keys_reach_nested_fields() {
        let resolver = plain().with_overrides(
            MappingTable::empty().with_rule(RuleName::ClosedOrder, StatusRule::new("info.status", "FILLED")),
        );
        let payload = json!({ "status": "open", "info": { "status": "FILLED" } });
        assert_eq!(resolver.detect_status(&payload), Some(OrderStatus::Filled));
    }

    #[test]
    fn set_overrides_swaps_snapshot() {
        let mut resolver = plain();
        let before = resolver.overrides();
        resolver.set_overrides(MappingTable::empty().with_order_type(OrderType::Market, "MARKET"));

        let ctx = OrderContext::new(OrderType::Market, OrderSide::Buy);
        assert_eq!(resolver.to_exchange_type(&ctx).unwrap(), "MARKET");
        assert!(before.is_empty());
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = binance();
        let payload = json!({ "status": "open", "filled": "1" });
        let first = resolver.detect_status(&payload);
        for _ in 0..10 {
            assert_eq!(resolver.detect_status(&payload), first);
        }
    }
}
