use crate::balance::{BalanceCache, BalanceSnapshot};
use crate::error::BrokerError;
use crate::notification::OrderNotification;
use crate::order::Order;
use crate::position::{Position, PositionBook};
use api_client::{ApiError, CreateOrder, ErrorCategory, HttpMethod, OhlcvQuery};
use chrono::{DateTime, Utc};
use configuration::BrokerConfig;
use core_types::{OrderRequest, OrderStatus, OrderType, Params, Timeframe};
use gateway::{Gateway, GatewayError, GatewayErrorKind};
use mapping::payload::{decimal_at, string_at};
use mapping::{MappingResolver, MappingTable, OrderContext, OverrideRegistry};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_CLOSED_ORDER_LIMIT: usize = 1000;

/// Outcome of one [`Broker::poll`] cycle.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Notifications queued during the cycle.
    pub notifications: usize,
    /// Orders that could not be refreshed. They keep their last confirmed status.
    pub failures: Vec<(Uuid, BrokerError)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The order reconciliation engine.
///
/// Owns every order submitted through it, keeps their canonical status in step with the
/// exchange, and queues one notification per state change for the engine to consume.
pub struct Broker {
    gateway: Arc<Gateway>,
    resolver: MappingResolver,
    currency: String,
    debug: bool,
    orders: HashMap<Uuid, Order>,
    /// Non-terminal orders in submission order. Only these are polled.
    open: Vec<Uuid>,
    /// Settled orders, oldest first. Forgotten once there are more than `closed_order_limit`.
    closed: VecDeque<Uuid>,
    closed_order_limit: usize,
    notifications: VecDeque<OrderNotification>,
    positions: PositionBook,
    balance: BalanceCache,
}

impl Broker {
    pub fn new(gateway: Arc<Gateway>, resolver: MappingResolver, currency: &str) -> Self {
        Self {
            gateway,
            resolver,
            currency: currency.to_string(),
            debug: false,
            orders: HashMap::new(),
            open: Vec::new(),
            closed: VecDeque::new(),
            closed_order_limit: DEFAULT_CLOSED_ORDER_LIMIT,
            notifications: VecDeque::new(),
            positions: PositionBook::default(),
            balance: BalanceCache::default(),
        }
    }

    /// Builds a broker for the gateway's exchange, with the registry's hook and the
    /// configured override table.
    pub fn from_config(
        config: &BrokerConfig,
        gateway: Arc<Gateway>,
        registry: &OverrideRegistry,
    ) -> Result<Self, BrokerError> {
        let overrides = MappingTable::from_config(&config.mapping)?;
        let resolver = MappingResolver::new(gateway.exchange_id(), registry).with_overrides(overrides);

        let broker = Self::new(gateway, resolver, &config.currency)
            .with_debug(config.debug)
            .with_closed_order_limit(config.closed_order_limit);
        Ok(broker)
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Settled orders kept for [`order`](Self::order) lookups. The latest one is always kept.
    pub fn with_closed_order_limit(mut self, limit: usize) -> Self {
        self.closed_order_limit = limit.max(1);
        self
    }

    pub fn resolver(&self) -> &MappingResolver {
        &self.resolver
    }

    /// Swaps the caller override table. Takes effect from the next operation.
    pub fn set_mapping_overrides(&mut self, overrides: MappingTable) {
        self.resolver.set_overrides(overrides);
    }

    // --- Orders ---

    /// Submits an order and returns its engine id.
    ///
    /// A transient create failure leaves the order `Submitted` with the create call queued
    /// for the next [`poll`](Self::poll). A fatal one rejects the order and returns the error,
    /// unless an earlier attempt went unanswered: then the order is looked up by its engine id
    /// and only rejected when the exchange does not know it.
    pub async fn submit(&mut self, request: OrderRequest) -> Result<Uuid, BrokerError> {
        validate(&request)?;
        if self.orders.contains_key(&request.client_order_id) {
            return Err(BrokerError::InvalidRequest(format!(
                "order {} was already submitted",
                request.client_order_id
            )));
        }

        let mut ctx = OrderContext::from_request(&request);
        if ctx.market_price.is_none() && self.resolver.requires_market_price(request.order_type) {
            ctx.market_price = Some(self.market_price(&request.symbol).await?);
        }
        let exchange_type = self.resolver.to_exchange_type(&ctx)?;

        let mut params = request.params.clone();
        params.extend(self.resolver.order_params(&ctx));
        params.insert("clientOrderId".to_string(), Value::String(request.client_order_id.to_string()));

        let create = CreateOrder {
            symbol: request.symbol.clone(),
            order_type: exchange_type,
            side: request.side,
            amount: request.quantity,
            price: request.price,
            params,
        };

        let id = request.client_order_id;
        tracing::info!(
            order_id = %id,
            symbol = %request.symbol,
            side = %request.side.as_str(),
            order_type = %request.order_type,
            exchange_type = %create.order_type,
            quantity = %request.quantity,
            "submitting order"
        );

        self.orders.insert(id, Order::new(&request, create));
        self.open.push(id);
        self.notify(id, None);

        self.send_create(id).await?;
        Ok(id)
    }

    async fn send_create(&mut self, id: Uuid) -> Result<(), BrokerError> {
        let (create, unconfirmed) = match self.orders.get(&id) {
            Some(order) if order.submit_pending => (order.create.clone(), order.create_unconfirmed),
            Some(_) => return Ok(()),
            None => return Err(BrokerError::UnknownOrder(id)),
        };

        let payload = match self.gateway.create_order(&create).await {
            Ok(payload) => payload,
            Err(err) if err.is_transient() => {
                tracing::warn!(order_id = %id, error = %err, "create failed transiently, retrying on next poll");
                if let Some(order) = self.orders.get_mut(&id) {
                    order.create_unconfirmed = true;
                }
                return Ok(());
            }
            Err(err)
                if unconfirmed
                    || err.attempts() > 1
                    || err.category() == ErrorCategory::DuplicateOrder =>
            {
                return self.recover_create(id, &create.symbol, err).await;
            }
            Err(err) => return Err(self.reject(id, err)),
        };
        self.log_payload(id, "create", &payload);
        self.accept(id, &payload)
    }

    /// A create was refused after an earlier attempt may already have placed the order.
    async fn recover_create(
        &mut self,
        id: Uuid,
        symbol: &str,
        err: GatewayError,
    ) -> Result<(), BrokerError> {
        tracing::warn!(order_id = %id, error = %err, "create refused after an unanswered attempt, looking the order up");
        match self.locate(id, symbol).await {
            Ok(Some(exchange_id)) => {
                tracing::info!(order_id = %id, %exchange_id, "order had reached the exchange");
                Ok(())
            }
            Ok(None) => Err(self.reject(id, err)),
            Err(BrokerError::Gateway(lookup)) => {
                if let Some(order) = self.orders.get_mut(&id) {
                    order.create_unconfirmed = true;
                }
                if lookup.is_transient() {
                    tracing::warn!(order_id = %id, error = %lookup, "order lookup failed, retrying on next poll");
                    Ok(())
                } else {
                    Err(BrokerError::Gateway(lookup))
                }
            }
            Err(other) => Err(other),
        }
    }

    /// Looks up an order whose create call was never acknowledged, by its engine id.
    /// Adopts the exchange's copy when there is one; `None` when the exchange has no such order.
    async fn locate(&mut self, id: Uuid, symbol: &str) -> Result<Option<String>, BrokerError> {
        match self.gateway.fetch_order_by_client_id(&id.to_string(), symbol).await {
            Ok(payload) => {
                self.log_payload(id, "lookup", &payload);
                self.accept(id, &payload)?;
                Ok(self.orders.get(&id).and_then(|order| order.exchange_id.clone()))
            }
            Err(err) if err.category() == ErrorCategory::OrderNotFound => Ok(None),
            Err(err) => Err(BrokerError::Gateway(err)),
        }
    }

    /// Records the exchange id from a create (or lookup) payload and reconciles the rest of it.
    fn accept(&mut self, id: Uuid, payload: &Value) -> Result<(), BrokerError> {
        let Some(exchange_id) = string_at(payload, "id") else {
            let err = GatewayError::Fatal {
                operation: "create_order",
                attempts: 1,
                source: ApiError::InvalidData("create-order response carries no order id".to_string()),
            };
            return Err(self.reject(id, err));
        };

        if let Some(order) = self.orders.get_mut(&id) {
            order.submit_pending = false;
            order.create_unconfirmed = false;
            order.exchange_id = Some(exchange_id.clone());
        }
        tracing::info!(order_id = %id, exchange_id = %exchange_id, "order accepted");
        self.advance(id, OrderStatus::Accepted, None);
        self.apply_payload(id, payload);
        Ok(())
    }

    fn reject(&mut self, id: Uuid, err: GatewayError) -> BrokerError {
        tracing::error!(order_id = %id, error = %err, "order rejected");
        if let Some(order) = self.orders.get_mut(&id) {
            order.submit_pending = false;
        }
        self.advance(id, OrderStatus::Rejected, Some(err.clone()));
        BrokerError::OrderRejected { order_id: id, source: err }
    }

    /// Cancels an order and returns the status it ends up in.
    ///
    /// The exchange payload decides: an order that filled before the cancel landed ends up
    /// `Filled`, not `Canceled`. An order whose create was never acknowledged is looked up by
    /// its engine id first and only canceled locally when the exchange does not know it.
    pub async fn cancel(&mut self, id: Uuid) -> Result<OrderStatus, BrokerError> {
        let order = self.orders.get(&id).ok_or(BrokerError::UnknownOrder(id))?;
        if order.status.is_terminal() {
            return Ok(order.status);
        }
        let symbol = order.symbol.clone();

        let exchange_id = match order.exchange_id.clone() {
            Some(exchange_id) => {
                match self.gateway.fetch_order(&exchange_id, &symbol).await {
                    Ok(payload) => {
                        self.log_payload(id, "fetch", &payload);
                        self.apply_payload(id, &payload);
                    }
                    Err(err) => tracing::warn!(order_id = %id, error = %err, "pre-cancel fetch failed"),
                }
                exchange_id
            }
            // The create was never acknowledged: the exchange may still hold the order.
            None => match self.locate(id, &symbol).await? {
                Some(exchange_id) => exchange_id,
                None => {
                    tracing::info!(order_id = %id, "order never reached the exchange, canceling locally");
                    if let Some(order) = self.orders.get_mut(&id) {
                        order.submit_pending = false;
                    }
                    self.advance(id, OrderStatus::Canceled, None);
                    return Ok(OrderStatus::Canceled);
                }
            },
        };

        let status = self.status_of(id)?;
        if status.is_terminal() {
            tracing::info!(order_id = %id, %status, "order already closed, cancel skipped");
            return Ok(status);
        }

        match self.gateway.cancel_order(&exchange_id, &symbol).await {
            Ok(payload) => {
                self.log_payload(id, "cancel", &payload);
                let detected = self.resolver.detect_status(&payload);
                if detected.is_some_and(|status| status.is_terminal()) {
                    self.apply_payload(id, &payload);
                    return self.status_of(id);
                }
                if self.resolver.confirms_cancel(&payload) {
                    self.apply_payload(id, &payload);
                    self.advance(id, OrderStatus::Canceled, None);
                    return self.status_of(id);
                }
                tracing::debug!(order_id = %id, "cancel not confirmed by response, re-fetching");
                self.refresh_order(id).await
            }
            Err(err) if err.kind() == GatewayErrorKind::Fatal => {
                tracing::warn!(order_id = %id, error = %err, "cancel failed, re-fetching order");
                match self.gateway.fetch_order(&exchange_id, &symbol).await {
                    Ok(payload) => {
                        self.apply_payload(id, &payload);
                        let status = self.status_of(id)?;
                        if status.is_terminal() { Ok(status) } else { Err(BrokerError::Gateway(err)) }
                    }
                    Err(_) => Err(BrokerError::Gateway(err)),
                }
            }
            Err(err) => Err(BrokerError::Gateway(err)),
        }
    }

    /// Replaces the quantity and/or limit price of an open order that has no fills yet.
    ///
    /// The exchange cancels the order and places the replacement in one call. The engine id
    /// stays the same and follows the replacement's exchange id.
    pub async fn edit_order(
        &mut self,
        id: Uuid,
        quantity: Option<Decimal>,
        price: Option<Decimal>,
    ) -> Result<OrderStatus, BrokerError> {
        let order = self.orders.get(&id).ok_or(BrokerError::UnknownOrder(id))?;
        if !order.is_open() {
            return Err(BrokerError::InvalidRequest(format!("order {} is already {}", id, order.status)));
        }
        let Some(exchange_id) = order.exchange_id.clone() else {
            return Err(BrokerError::InvalidRequest(format!("order {} has not reached the exchange", id)));
        };
        if !order.filled.is_zero() {
            return Err(BrokerError::InvalidRequest(format!("order {} is partially filled", id)));
        }
        if quantity.is_some_and(|q| q <= Decimal::ZERO) || price.is_some_and(|p| p <= Decimal::ZERO) {
            return Err(BrokerError::InvalidRequest(
                "edited quantity and price must be positive".to_string(),
            ));
        }

        let mut create = order.create.clone();
        if let Some(quantity) = quantity {
            create.amount = quantity;
        }
        if price.is_some() {
            create.price = price;
        }
        tracing::info!(order_id = %id, %exchange_id, quantity = %create.amount, price = ?create.price, "editing order");

        let payload = match self.gateway.edit_order(&exchange_id, &create).await {
            Ok(payload) => payload,
            Err(err) => {
                if !err.is_transient() {
                    // The cancel leg may have gone through without the replacement.
                    if let Err(refresh) = self.refresh_order(id).await {
                        tracing::warn!(order_id = %id, error = %refresh, "refresh after failed edit failed");
                    }
                }
                return Err(BrokerError::Gateway(err));
            }
        };
        self.log_payload(id, "edit", &payload);

        let Some(replacement_id) = string_at(&payload, "id") else {
            return Err(BrokerError::Gateway(GatewayError::Fatal {
                operation: "edit_order",
                attempts: 1,
                source: ApiError::InvalidData("edit-order response carries no order id".to_string()),
            }));
        };
        if let Some(order) = self.orders.get_mut(&id) {
            tracing::info!(order_id = %id, from = %exchange_id, to = %replacement_id, "order replaced");
            order.exchange_id = Some(replacement_id);
            order.quantity = create.amount;
            order.remaining = create.amount;
            order.price = create.price;
            order.create = create;
        }
        self.apply_payload(id, &payload);
        self.status_of(id)
    }

    /// Re-fetches one order and reconciles it.
    pub async fn refresh_order(&mut self, id: Uuid) -> Result<OrderStatus, BrokerError> {
        let order = self.orders.get(&id).ok_or(BrokerError::UnknownOrder(id))?;
        let Some(exchange_id) = order.exchange_id.clone() else {
            return Ok(order.status);
        };
        let symbol = order.symbol.clone();

        let payload = self.gateway.fetch_order(&exchange_id, &symbol).await?;
        self.log_payload(id, "fetch", &payload);
        self.apply_payload(id, &payload);
        self.status_of(id)
    }

    /// Applies a batch of exchange order payloads to the tracked open orders, matching by
    /// exchange id. Returns the number of notifications queued.
    pub fn apply_snapshot(&mut self, payloads: &[Value]) -> usize {
        let by_exchange_id: HashMap<String, Uuid> = self
            .open
            .iter()
            .filter_map(|id| self.orders.get(id))
            .filter_map(|order| order.exchange_id.clone().map(|eid| (eid, order.id)))
            .collect();

        let before = self.notifications.len();
        for payload in payloads {
            let Some(id) = string_at(payload, "id").and_then(|eid| by_exchange_id.get(&eid).copied())
            else {
                continue;
            };
            self.apply_payload(id, payload);
        }
        self.notifications.len() - before
    }

    /// One reconciliation cycle: retries queued create calls, then re-fetches every open order.
    pub async fn poll(&mut self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let before = self.notifications.len();

        let pending: Vec<Uuid> = self
            .open
            .iter()
            .filter(|id| self.orders.get(*id).is_some_and(|o| o.submit_pending))
            .copied()
            .collect();
        for id in pending {
            if let Err(err) = self.send_create(id).await {
                report.failures.push((id, err));
            }
        }

        let open: Vec<(Uuid, String, String)> = self
            .open
            .iter()
            .filter_map(|id| self.orders.get(id))
            .filter_map(|order| {
                order.exchange_id.clone().map(|eid| (order.id, eid, order.symbol.clone()))
            })
            .collect();

        let mut payloads = Vec::with_capacity(open.len());
        for (id, exchange_id, symbol) in open {
            match self.gateway.fetch_order(&exchange_id, &symbol).await {
                Ok(payload) => {
                    self.log_payload(id, "fetch", &payload);
                    payloads.push(payload);
                }
                Err(err) => {
                    tracing::warn!(order_id = %id, error = %err, "order refresh failed, keeping last status");
                    report.failures.push((id, BrokerError::Gateway(err)));
                }
            }
        }
        self.apply_snapshot(&payloads);

        report.notifications = self.notifications.len() - before;
        report
    }

    /// Reconciles one order against an exchange payload.
    fn apply_payload(&mut self, id: Uuid, payload: &Value) {
        let detected = self.resolver.detect_status(payload);
        let Some(order) = self.orders.get_mut(&id) else {
            return;
        };

        // A stale payload must not roll fills back either.
        if detected.is_some_and(|status| status.rank() < order.status.rank()) {
            tracing::debug!(order_id = %id, current = %order.status, "ignoring stale payload");
            return;
        }

        // Fills never shrink: without a status advance, a smaller fill is an older payload.
        let filled = decimal_at(payload, "filled");
        if filled.is_some_and(|filled| filled < order.filled)
            && detected.is_none_or(|status| status.rank() <= order.status.rank())
        {
            tracing::debug!(order_id = %id, filled = %order.filled, "ignoring payload with a smaller fill");
            return;
        }

        let previous_filled = order.filled;
        let previous_average = order.average_price;
        if let Some(filled) = filled {
            order.filled = order.filled.max(filled);
        }
        order.remaining = decimal_at(payload, "remaining")
            .unwrap_or_else(|| (order.quantity - order.filled).max(Decimal::ZERO));
        if let Some(average) = decimal_at(payload, "average") {
            order.average_price = Some(average);
        }
        order.last_payload = Some(payload.clone());
        order.updated_at = Utc::now();

        let fill = order.filled - previous_filled;
        if fill > Decimal::ZERO {
            let price = fill_price(previous_filled, previous_average, order.filled, order.average_price)
                .or(order.price);
            self.positions.apply_fill(&order.symbol, order.side, fill, price);
        }

        let Some(status) = detected else {
            tracing::debug!(order_id = %id, "status not recognised, keeping {}", order.status);
            return;
        };

        if status == OrderStatus::PartiallyFilled
            && order.status == OrderStatus::PartiallyFilled
            && order.filled > previous_filled
        {
            self.notify(id, None);
        } else {
            self.advance(id, status, None);
        }
    }

    /// Moves an order forward and queues its notification. Regressions and repeats are dropped.
    fn advance(&mut self, id: Uuid, next: OrderStatus, error: Option<GatewayError>) -> bool {
        let Some(order) = self.orders.get_mut(&id) else {
            return false;
        };
        if !order.status.can_advance_to(next) || order.notified.contains(&next) {
            return false;
        }

        tracing::info!(order_id = %id, from = %order.status, to = %next, "order status changed");
        order.status = next;
        order.updated_at = Utc::now();
        if next.is_terminal() {
            order.submit_pending = false;
        }
        self.notify(id, error);
        if next.is_terminal() {
            self.settle(id);
        }
        true
    }

    fn notify(&mut self, id: Uuid, error: Option<GatewayError>) {
        if let Some(order) = self.orders.get_mut(&id) {
            order.notified.insert(order.status);
            self.notifications.push_back(OrderNotification::for_order(order, error));
        }
    }

    /// Moves a terminal order out of the open set and forgets the oldest settled ones.
    fn settle(&mut self, id: Uuid) {
        self.open.retain(|open| *open != id);
        self.closed.push_back(id);
        while self.closed.len() > self.closed_order_limit {
            if let Some(evicted) = self.closed.pop_front() {
                self.orders.remove(&evicted);
            }
        }
    }

    fn status_of(&self, id: Uuid) -> Result<OrderStatus, BrokerError> {
        self.orders.get(&id).map(|o| o.status).ok_or(BrokerError::UnknownOrder(id))
    }

    fn log_payload(&self, id: Uuid, source: &str, payload: &Value) {
        if self.debug {
            tracing::debug!(order_id = %id, source, payload = %payload, "exchange payload");
        }
    }

    // --- Notifications ---

    pub fn next_notification(&mut self) -> Option<OrderNotification> {
        self.notifications.pop_front()
    }

    pub fn drain_notifications(&mut self) -> Vec<OrderNotification> {
        self.notifications.drain(..).collect()
    }

    // --- Queries ---

    /// An open order, or a settled one that has not been forgotten yet.
    pub fn order(&self, id: Uuid) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Tracked orders that are not terminal yet, in submission order.
    pub fn open_orders(&self) -> Vec<&Order> {
        self.open.iter().filter_map(|id| self.orders.get(id)).collect()
    }

    /// Settled orders still kept, oldest first.
    pub fn closed_orders(&self) -> Vec<&Order> {
        self.closed.iter().filter_map(|id| self.orders.get(id)).collect()
    }

    /// Open orders as the exchange reports them, including ones this broker did not submit.
    pub async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Value>, BrokerError> {
        Ok(self.gateway.fetch_open_orders(symbol).await?)
    }

    /// Order history as the exchange reports it, limited to orders that left the book.
    pub async fn fetch_closed_orders(
        &self,
        symbol: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, BrokerError> {
        Ok(self.gateway.fetch_closed_orders(symbol, since, limit).await?)
    }

    // --- Positions ---

    /// Position built from the fills of orders submitted through this broker.
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter()
    }

    /// Derivative positions as the exchange reports them. No mapping is applied.
    pub async fn fetch_positions(&self, symbols: &[String]) -> Result<Vec<Value>, BrokerError> {
        Ok(self.gateway.fetch_positions(symbols).await?)
    }

    /// Escape hatch to a private endpoint. No mapping is applied to the result.
    pub async fn raw_call(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &Params,
    ) -> Result<Value, BrokerError> {
        Ok(self.gateway.raw_call(method, endpoint, params).await?)
    }

    // --- Balance ---

    /// Fetches the balance with exchange-specific `params` and replaces the cached snapshot.
    pub async fn get_wallet_balance(&mut self, params: &Params) -> Result<BalanceSnapshot, BrokerError> {
        let payload = self.gateway.fetch_balance(params).await?;
        let snapshot = BalanceSnapshot::from_payload(&self.currency, &payload);
        tracing::debug!(currency = %snapshot.currency, cash = %snapshot.cash, value = %snapshot.value, "balance refreshed");
        self.balance.replace(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn refresh_balance(&mut self) -> Result<BalanceSnapshot, BrokerError> {
        self.get_wallet_balance(&Params::new()).await
    }

    /// Cached free balance of the account currency. Zero before the first refresh.
    pub fn cash(&self) -> Decimal {
        self.balance.cash()
    }

    /// Cached total balance of the account currency. Zero before the first refresh.
    pub fn value(&self) -> Decimal {
        self.balance.value()
    }

    pub fn balance(&self) -> Option<&BalanceSnapshot> {
        self.balance.snapshot()
    }

    /// Close of the latest one-minute bar.
    async fn market_price(&self, symbol: &str) -> Result<Decimal, BrokerError> {
        let query = OhlcvQuery {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M1,
            since: None,
            limit: Some(1),
            params: Params::new(),
        };
        let candles = self.gateway.fetch_ohlcv(&query).await?;
        candles
            .last()
            .map(|candle| candle.close)
            .ok_or_else(|| BrokerError::NoMarketPrice(symbol.to_string()))
    }
}

/// Price of the latest fill, backed out of the running average.
fn fill_price(
    previous_filled: Decimal,
    previous_average: Option<Decimal>,
    filled: Decimal,
    average: Option<Decimal>,
) -> Option<Decimal> {
    let average = average?;
    match previous_average {
        Some(previous) if !previous_filled.is_zero() && filled > previous_filled => {
            Some((average * filled - previous * previous_filled) / (filled - previous_filled))
        }
        _ => Some(average),
    }
}

fn validate(request: &OrderRequest) -> Result<(), BrokerError> {
    if request.quantity <= Decimal::ZERO {
        return Err(BrokerError::InvalidRequest(format!(
            "quantity must be positive, got {}",
            request.quantity
        )));
    }
    for (name, value) in [("price", request.price), ("stop price", request.stop_price)] {
        if value.is_some_and(|v| v <= Decimal::ZERO) {
            return Err(BrokerError::InvalidRequest(format!("{} must be positive", name)));
        }
    }
    match request.order_type {
        OrderType::Limit | OrderType::StopLimit if request.price.is_none() => Err(
            BrokerError::InvalidRequest(format!("{} orders need a limit price", request.order_type)),
        ),
        OrderType::StopLimit if request.stop_price.is_none() => Err(BrokerError::InvalidRequest(
            "StopLimit orders need a stop price".to_string(),
        )),
        _ => Ok(()),
    }
}
