use crate::{Broker, BrokerError};
use api_client::mock::ScriptedExchange;
use api_client::{ApiError, HttpMethod};
use chrono::Utc;
use core_types::{Candle, OrderRequest, OrderSide, OrderStatus, OrderType, Params, Timeframe};
use gateway::{Gateway, GatewayErrorKind, RetryPolicy};
use mapping::{MappingError, MappingResolver, MappingTable, OverrideRegistry, RuleName, StatusRule};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn setup(exchange_id: &str) -> (Arc<ScriptedExchange>, Broker) {
    let exchange = Arc::new(ScriptedExchange::new(exchange_id));
    let policy = RetryPolicy {
        max_attempts: 2,
        min_interval: None,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(100),
        jitter: 0.0,
    };
    let gateway = Arc::new(Gateway::new(exchange.clone(), policy));
    let resolver = MappingResolver::new(exchange_id, &OverrideRegistry::with_defaults());
    (exchange, Broker::new(gateway, resolver, "USDT"))
}

fn payload(id: &str, status: &str, filled: &str, remaining: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "amount": "1",
        "filled": filled,
        "remaining": remaining,
        "average": null,
    })
}

fn statuses(broker: &mut Broker) -> Vec<OrderStatus> {
    broker.drain_notifications().into_iter().map(|n| n.status).collect()
}

/// Submits a market buy of 1 that the exchange acknowledges as open with id "1".
async fn submit_open(exchange: &ScriptedExchange, broker: &mut Broker) -> uuid::Uuid {
    exchange.push_create(Ok(payload("1", "open", "0", "1")));
    let id = broker
        .submit(OrderRequest::market("BNB/USDT", OrderSide::Buy, dec!(1)))
        .await
        .unwrap();
    broker.drain_notifications();
    id
}

#[tokio::test(start_paused = true)]
async fn submit_notifies_submitted_then_accepted() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_create(Ok(payload("100", "open", "0", "1")));

    let request = OrderRequest::market("BNB/USDT", OrderSide::Buy, dec!(1));
    let client_id = request.client_order_id;
    let id = broker.submit(request).await.unwrap();

    assert_eq!(id, client_id);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Submitted, OrderStatus::Accepted]);
    assert_eq!(broker.order(id).unwrap().exchange_id.as_deref(), Some("100"));

    let created = exchange.created_orders();
    assert_eq!(created[0].order_type, "market");
    assert_eq!(created[0].params["clientOrderId"], json!(client_id.to_string()));
}

#[tokio::test(start_paused = true)]
async fn create_response_that_is_already_filled_completes_the_order() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_create(Ok(payload("100", "closed", "1", "0")));

    let id = broker
        .submit(OrderRequest::market("BNB/USDT", OrderSide::Sell, dec!(1)))
        .await
        .unwrap();

    assert_eq!(
        statuses(&mut broker),
        vec![OrderStatus::Submitted, OrderStatus::Accepted, OrderStatus::Filled]
    );
    let order = broker.order(id).unwrap();
    assert_eq!(order.filled, dec!(1));
    assert_eq!(order.remaining, Decimal::ZERO);
    assert!(broker.open_orders().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fatal_submit_rejects_with_cause_attached() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_create(Err(ApiError::InsufficientFunds("balance too low".into())));

    let err = broker
        .submit(OrderRequest::limit("BNB/USDT", OrderSide::Buy, dec!(5), dec!(250)))
        .await
        .unwrap_err();

    let BrokerError::OrderRejected { order_id, source } = err else {
        panic!("expected a rejection");
    };
    assert_eq!(source.kind(), GatewayErrorKind::Fatal);
    assert_eq!(broker.order(order_id).unwrap().status, OrderStatus::Rejected);

    let notifications = broker.drain_notifications();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[1].status, OrderStatus::Rejected);
    assert_eq!(notifications[1].error.as_ref().map(|e| e.cause().clone()), Some(source.cause().clone()));
    assert_eq!(exchange.call_count("create_order"), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_submit_stays_submitted_and_retries_on_poll() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_create(Err(ApiError::Timeout));
    exchange.push_create(Err(ApiError::Throttled("slow down".into())));

    let id = broker
        .submit(OrderRequest::market("BNB/USDT", OrderSide::Buy, dec!(1)))
        .await
        .unwrap();
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Submitted]);
    assert!(broker.order(id).unwrap().is_submit_pending());

    exchange.push_create(Ok(payload("7", "open", "0", "1")));
    exchange.push_fetch(Ok(payload("7", "open", "0", "1")));
    let report = broker.poll().await;

    assert!(report.is_clean());
    assert_eq!(report.notifications, 1);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Accepted]);
    assert!(!broker.order(id).unwrap().is_submit_pending());
    assert_eq!(exchange.call_count("create_order"), 3);
}

#[tokio::test(start_paused = true)]
async fn unmapped_order_type_fails_synchronously() {
    let (exchange, mut broker) = setup("kraken");

    let err = broker
        .submit(OrderRequest::new("BNB/USDT", OrderSide::Sell, OrderType::StopTrail, dec!(1)))
        .await
        .unwrap_err();

    assert_eq!(err, BrokerError::Mapping(MappingError::UnmappedType(OrderType::StopTrail)));
    assert!(broker.open_orders().is_empty());
    assert!(broker.next_notification().is_none());
    assert_eq!(exchange.call_count("create_order"), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_are_refused_before_any_call() {
    let (exchange, mut broker) = setup("kraken");

    let zero = OrderRequest::market("BNB/USDT", OrderSide::Buy, Decimal::ZERO);
    assert!(matches!(broker.submit(zero).await, Err(BrokerError::InvalidRequest(_))));

    let zero_price = OrderRequest::limit("BNB/USDT", OrderSide::Buy, dec!(1), Decimal::ZERO);
    assert!(matches!(broker.submit(zero_price).await, Err(BrokerError::InvalidRequest(_))));

    assert!(exchange.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn binance_stop_limit_sell_below_market_uses_stop_loss_limit() {
    let (exchange, mut broker) = setup("binance");
    exchange.push_ohlcv(Ok(vec![Candle {
        timestamp: Utc::now(),
        open: dec!(299),
        high: dec!(301),
        low: dec!(298),
        close: dec!(300),
        volume: dec!(12),
    }]));
    exchange.push_create(Ok(payload("55", "open", "0", "1")));

    broker
        .submit(OrderRequest::stop_limit("BNB/USDT", OrderSide::Sell, dec!(1), dec!(290), dec!(289)))
        .await
        .unwrap();

    let created = exchange.created_orders();
    assert_eq!(created[0].order_type, "STOP_LOSS_LIMIT");
    assert_eq!(created[0].price, Some(dec!(289)));
    assert_eq!(created[0].params["stopPrice"], json!("290"));

    let queries = exchange.ohlcv_queries();
    assert_eq!(queries[0].timeframe, Timeframe::M1);
    assert_eq!(queries[0].limit, Some(1));
}

#[tokio::test(start_paused = true)]
async fn reference_price_skips_the_market_lookup() {
    let (exchange, mut broker) = setup("binance");
    exchange.push_create(Ok(payload("56", "open", "0", "1")));

    let request = OrderRequest::stop_limit("BNB/USDT", OrderSide::Buy, dec!(1), dec!(290), dec!(291))
        .with_reference_price(dec!(300));
    broker.submit(request).await.unwrap();

    assert_eq!(exchange.created_orders()[0].order_type, "TAKE_PROFIT_LIMIT");
    assert_eq!(exchange.call_count("fetch_ohlcv"), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_racing_a_fill_reports_filled_only() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Ok(payload("1", "open", "0", "1")));
    exchange.push_cancel(Ok(payload("1", "closed", "1", "0")));

    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Filled);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Filled]);
    assert_eq!(broker.order(id).unwrap().filled, dec!(1));
}

#[tokio::test(start_paused = true)]
async fn cancel_skips_the_request_when_the_order_already_closed() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Ok(payload("1", "closed", "1", "0")));

    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Filled);
    assert_eq!(exchange.call_count("cancel_order"), 0);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Filled]);
}

#[tokio::test(start_paused = true)]
async fn confirmed_cancel_transitions_to_canceled() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Ok(payload("1", "open", "0", "1")));
    exchange.push_cancel(Ok(payload("1", "canceled", "0", "1")));

    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Canceled);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Canceled]);

    // Canceling again is a no-op.
    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Canceled);
    assert!(broker.next_notification().is_none());
}

#[tokio::test(start_paused = true)]
async fn custom_cancel_rule_confirms_numeric_result() {
    let (exchange, mut broker) = setup("kraken");
    broker.set_mapping_overrides(
        MappingTable::empty().with_rule(RuleName::CancelConfirmed, StatusRule::new("result", 1)),
    );
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Ok(payload("1", "open", "0", "1")));
    exchange.push_cancel(Ok(json!({ "result": 1 })));

    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Canceled);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_cancel_is_resolved_by_refetch() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Ok(payload("1", "open", "0", "1")));
    exchange.push_cancel(Ok(payload("1", "canceling", "0", "1")));
    exchange.push_fetch(Ok(payload("1", "canceled", "0", "1")));

    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Canceled);
    assert_eq!(exchange.call_count("fetch_order"), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_of_a_vanished_order_trusts_the_refetch() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Ok(payload("1", "open", "0", "1")));
    exchange.push_cancel(Err(ApiError::OrderNotFound("Unknown order sent.".into())));
    exchange.push_fetch(Ok(payload("1", "closed", "1", "0")));

    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Filled);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Filled]);
}

#[tokio::test(start_paused = true)]
async fn transient_cancel_failure_keeps_the_order_open() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Ok(payload("1", "open", "0", "1")));
    exchange.push_cancel(Err(ApiError::Timeout));
    exchange.push_cancel(Err(ApiError::Timeout));

    let err = broker.cancel(id).await.unwrap_err();
    assert!(matches!(err, BrokerError::Gateway(ref e) if e.is_transient()));
    assert_eq!(broker.order(id).unwrap().status, OrderStatus::Accepted);
    assert!(broker.next_notification().is_none());
}

/// Submits a market buy whose create call times out on both attempts.
async fn submit_unacknowledged(exchange: &ScriptedExchange, broker: &mut Broker) -> uuid::Uuid {
    exchange.push_create(Err(ApiError::Timeout));
    exchange.push_create(Err(ApiError::Timeout));
    let id = broker
        .submit(OrderRequest::market("BNB/USDT", OrderSide::Buy, dec!(1)))
        .await
        .unwrap();
    broker.drain_notifications();
    id
}

#[tokio::test(start_paused = true)]
async fn cancel_of_an_unacknowledged_order_the_exchange_never_saw_is_local() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_unacknowledged(&exchange, &mut broker).await;

    exchange.push_fetch_by_client_id(Err(ApiError::OrderNotFound("Order does not exist.".into())));
    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Canceled);
    assert_eq!(exchange.call_count("cancel_order"), 0);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Canceled]);

    let lookups: Vec<_> = exchange
        .calls()
        .into_iter()
        .filter(|call| call.operation == "fetch_order_by_client_id")
        .collect();
    assert_eq!(lookups[0].target, id.to_string());

    // The queued create is dropped with the order.
    broker.poll().await;
    assert_eq!(exchange.call_count("create_order"), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_of_an_unacknowledged_order_that_reached_the_exchange_cancels_it_there() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_unacknowledged(&exchange, &mut broker).await;

    exchange.push_fetch_by_client_id(Ok(payload("7", "open", "0", "1")));
    exchange.push_cancel(Ok(payload("7", "canceled", "0", "1")));

    assert_eq!(broker.cancel(id).await.unwrap(), OrderStatus::Canceled);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Accepted, OrderStatus::Canceled]);
    let order = broker.order(id).unwrap();
    assert_eq!(order.exchange_id.as_deref(), Some("7"));
    assert!(!order.is_submit_pending());
    assert_eq!(exchange.calls().last().unwrap().target, "7");
}

#[tokio::test(start_paused = true)]
async fn cancel_of_an_unacknowledged_order_keeps_it_when_the_lookup_fails() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_unacknowledged(&exchange, &mut broker).await;

    exchange.push_fetch_by_client_id(Err(ApiError::Timeout));
    exchange.push_fetch_by_client_id(Err(ApiError::Timeout));

    let err = broker.cancel(id).await.unwrap_err();
    assert!(matches!(err, BrokerError::Gateway(ref e) if e.is_transient()));
    let order = broker.order(id).unwrap();
    assert_eq!(order.status, OrderStatus::Submitted);
    assert!(order.is_submit_pending());
    assert!(broker.next_notification().is_none());
}

#[tokio::test(start_paused = true)]
async fn duplicate_refusal_after_a_timeout_adopts_the_placed_order() {
    let (exchange, mut broker) = setup("binance");
    exchange.push_create(Err(ApiError::Timeout));
    exchange.push_create(Err(ApiError::from_binance(400, -2010, "Duplicate order sent.".into())));
    exchange.push_fetch_by_client_id(Ok(payload("31", "open", "0", "1")));

    let id = broker
        .submit(OrderRequest::market("BNB/USDT", OrderSide::Buy, dec!(1)))
        .await
        .unwrap();

    assert_eq!(statuses(&mut broker), vec![OrderStatus::Submitted, OrderStatus::Accepted]);
    assert_eq!(broker.order(id).unwrap().exchange_id.as_deref(), Some("31"));
    assert_eq!(exchange.call_count("fetch_order_by_client_id"), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_refusal_on_a_later_poll_adopts_a_filled_order() {
    let (exchange, mut broker) = setup("binance");
    let id = submit_unacknowledged(&exchange, &mut broker).await;

    exchange.push_create(Err(ApiError::from_binance(400, -2010, "Duplicate order sent.".into())));
    exchange.push_fetch_by_client_id(Ok(payload("32", "closed", "1", "0")));
    let report = broker.poll().await;

    assert!(report.is_clean());
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Accepted, OrderStatus::Filled]);
    assert_eq!(broker.order(id).unwrap().filled, dec!(1));
}

#[tokio::test(start_paused = true)]
async fn refusal_after_a_timeout_rejects_once_the_exchange_denies_the_order() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_create(Err(ApiError::Timeout));
    exchange.push_create(Err(ApiError::InsufficientFunds("balance too low".into())));
    exchange.push_fetch_by_client_id(Err(ApiError::OrderNotFound("Order does not exist.".into())));

    let err = broker
        .submit(OrderRequest::market("BNB/USDT", OrderSide::Buy, dec!(1)))
        .await
        .unwrap_err();

    let BrokerError::OrderRejected { source, .. } = err else {
        panic!("expected a rejection");
    };
    assert_eq!(source.category(), api_client::ErrorCategory::InsufficientFunds);
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Submitted, OrderStatus::Rejected]);
}

#[tokio::test(start_paused = true)]
async fn unanswered_lookup_keeps_the_order_submitted() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_create(Err(ApiError::Timeout));
    exchange.push_create(Err(ApiError::from_binance(400, -2010, "Duplicate order sent.".into())));
    exchange.push_fetch_by_client_id(Err(ApiError::Timeout));
    exchange.push_fetch_by_client_id(Err(ApiError::Timeout));

    let id = broker
        .submit(OrderRequest::market("BNB/USDT", OrderSide::Buy, dec!(1)))
        .await
        .unwrap();

    assert_eq!(statuses(&mut broker), vec![OrderStatus::Submitted]);
    assert!(broker.order(id).unwrap().is_submit_pending());
}

#[tokio::test(start_paused = true)]
async fn duplicate_snapshots_notify_terminal_status_once() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    let closed = payload("1", "closed", "1", "0");
    assert_eq!(broker.apply_snapshot(&[closed.clone(), closed.clone()]), 1);
    assert_eq!(broker.apply_snapshot(&[closed]), 0);

    // A stale snapshot does not move the order back.
    assert_eq!(broker.apply_snapshot(&[payload("1", "open", "0", "1")]), 0);
    let order = broker.order(id).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled, dec!(1));

    assert_eq!(statuses(&mut broker), vec![OrderStatus::Filled]);
}

#[tokio::test(start_paused = true)]
async fn partial_fills_repeat_only_when_the_fill_grows() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    broker.apply_snapshot(&[payload("1", "open", "0.2", "0.8")]);
    broker.apply_snapshot(&[payload("1", "open", "0.2", "0.8")]);
    broker.apply_snapshot(&[payload("1", "open", "0.5", "0.5")]);
    broker.apply_snapshot(&[payload("1", "closed", "1", "0")]);

    let notifications = broker.drain_notifications();
    let fills: Vec<_> = notifications.iter().map(|n| (n.status, n.filled)).collect();
    assert_eq!(
        fills,
        vec![
            (OrderStatus::PartiallyFilled, dec!(0.2)),
            (OrderStatus::PartiallyFilled, dec!(0.5)),
            (OrderStatus::Filled, dec!(1)),
        ]
    );
    assert_eq!(broker.order(id).unwrap().remaining, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn smaller_fill_at_the_same_status_is_ignored() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    broker.apply_snapshot(&[payload("1", "open", "0.5", "0.5")]);
    broker.apply_snapshot(&[payload("1", "open", "0.2", "0.8")]);
    assert_eq!(broker.order(id).unwrap().filled, dec!(0.5));
    assert_eq!(broker.order(id).unwrap().remaining, dec!(0.5));
    broker.apply_snapshot(&[payload("1", "open", "0.5", "0.5")]);

    let fills: Vec<_> = broker.drain_notifications().iter().map(|n| (n.status, n.filled)).collect();
    assert_eq!(fills, vec![(OrderStatus::PartiallyFilled, dec!(0.5))]);
}

#[tokio::test(start_paused = true)]
async fn unknown_status_keeps_the_last_confirmed_one() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    assert_eq!(broker.apply_snapshot(&[payload("1", "pending_whatever", "0", "1")]), 0);
    assert_eq!(broker.order(id).unwrap().status, OrderStatus::Accepted);
}

#[tokio::test(start_paused = true)]
async fn snapshots_for_untracked_orders_are_ignored() {
    let (exchange, mut broker) = setup("kraken");
    submit_open(&exchange, &mut broker).await;

    assert_eq!(broker.apply_snapshot(&[payload("999", "closed", "1", "0")]), 0);
}

#[tokio::test(start_paused = true)]
async fn poll_failure_is_reported_without_status_change() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Err(ApiError::Timeout));
    exchange.push_fetch(Err(ApiError::Timeout));
    let report = broker.poll().await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, id);
    assert_eq!(report.notifications, 0);
    assert_eq!(broker.order(id).unwrap().status, OrderStatus::Accepted);
}

#[tokio::test(start_paused = true)]
async fn poll_reconciles_open_orders() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_fetch(Ok(payload("1", "expired", "0", "1")));
    let report = broker.poll().await;

    assert!(report.is_clean());
    assert_eq!(report.notifications, 1);
    assert_eq!(broker.order(id).unwrap().status, OrderStatus::Expired);

    // Terminal orders are no longer fetched.
    broker.poll().await;
    assert_eq!(exchange.call_count("fetch_order"), 1);
}

#[tokio::test(start_paused = true)]
async fn settled_orders_leave_the_poll_set_and_the_oldest_are_forgotten() {
    let (exchange, broker) = setup("kraken");
    let mut broker = broker.with_closed_order_limit(10);

    let mut ids = Vec::new();
    for n in 0..50 {
        exchange.push_create(Ok(payload(&n.to_string(), "closed", "1", "0")));
        let id = broker
            .submit(OrderRequest::market("BNB/USDT", OrderSide::Buy, dec!(1)))
            .await
            .unwrap();
        ids.push(id);
    }

    assert_eq!(broker.drain_notifications().len(), 150);
    assert!(broker.open_orders().is_empty());
    assert_eq!(broker.closed_orders().len(), 10);
    assert!(broker.order(ids[0]).is_none());
    assert_eq!(broker.order(ids[49]).unwrap().status, OrderStatus::Filled);

    let report = broker.poll().await;
    assert_eq!(report.notifications, 0);
    assert_eq!(exchange.call_count("fetch_order"), 0);

    // Forgotten ids are unknown rather than silently reopened.
    assert_eq!(broker.cancel(ids[0]).await, Err(BrokerError::UnknownOrder(ids[0])));
}

#[tokio::test(start_paused = true)]
async fn fills_build_the_position_book() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    let mut partial = payload("1", "open", "0.4", "0.6");
    partial["average"] = json!("300");
    broker.apply_snapshot(&[partial]);

    let mut filled = payload("1", "closed", "1", "0");
    filled["average"] = json!("306");
    broker.apply_snapshot(&[filled]);

    let position = broker.position("BNB/USDT").unwrap();
    assert_eq!(position.size, dec!(1));
    assert_eq!(position.price, Some(dec!(306)));
    assert_eq!(broker.order(id).unwrap().average_price, Some(dec!(306)));

    exchange.push_create(Ok(json!({
        "id": "2", "status": "closed", "amount": "1", "filled": "1", "remaining": "0", "average": "320"
    })));
    broker
        .submit(OrderRequest::market("BNB/USDT", OrderSide::Sell, dec!(1)))
        .await
        .unwrap();
    assert!(broker.position("BNB/USDT").is_none());
    assert_eq!(broker.positions().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn edit_replaces_the_exchange_order() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_create(Ok(payload("1", "open", "0", "1")));
    let id = broker
        .submit(OrderRequest::limit("BNB/USDT", OrderSide::Buy, dec!(1), dec!(250)))
        .await
        .unwrap();
    broker.drain_notifications();

    exchange.push_edit(Ok(json!({
        "id": "2", "status": "open", "amount": "2", "filled": "0", "remaining": "2", "average": null
    })));
    let status = broker.edit_order(id, Some(dec!(2)), Some(dec!(245))).await.unwrap();

    assert_eq!(status, OrderStatus::Accepted);
    let order = broker.order(id).unwrap();
    assert_eq!(order.exchange_id.as_deref(), Some("2"));
    assert_eq!(order.quantity, dec!(2));
    assert_eq!(order.price, Some(dec!(245)));

    let edited = exchange.edited_orders();
    assert_eq!(edited[0].0, "1");
    assert_eq!(edited[0].1.amount, dec!(2));
    assert_eq!(edited[0].1.price, Some(dec!(245)));
    assert_eq!(edited[0].1.params["clientOrderId"], json!(id.to_string()));

    // Polling now follows the replacement.
    exchange.push_fetch(Ok(json!({
        "id": "2", "status": "closed", "amount": "2", "filled": "2", "remaining": "0", "average": "245"
    })));
    broker.poll().await;
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Filled]);
    assert_eq!(exchange.calls().last().unwrap().target, "2");
}

#[tokio::test(start_paused = true)]
async fn failed_edit_reconciles_the_original_order() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    exchange.push_edit(Err(ApiError::InvalidRequest { code: -2021, message: "Order cancel-replace partially failed.".into() }));
    exchange.push_fetch(Ok(payload("1", "canceled", "0", "1")));

    let err = broker.edit_order(id, None, Some(dec!(240))).await.unwrap_err();
    assert!(matches!(err, BrokerError::Gateway(ref e) if !e.is_transient()));
    assert_eq!(broker.order(id).unwrap().exchange_id.as_deref(), Some("1"));
    assert_eq!(statuses(&mut broker), vec![OrderStatus::Canceled]);
}

#[tokio::test(start_paused = true)]
async fn edit_refuses_partially_filled_and_settled_orders() {
    let (exchange, mut broker) = setup("kraken");
    let id = submit_open(&exchange, &mut broker).await;

    broker.apply_snapshot(&[payload("1", "open", "0.3", "0.7")]);
    assert!(matches!(
        broker.edit_order(id, Some(dec!(2)), None).await,
        Err(BrokerError::InvalidRequest(_))
    ));

    broker.apply_snapshot(&[payload("1", "closed", "1", "0")]);
    assert!(matches!(
        broker.edit_order(id, Some(dec!(2)), None).await,
        Err(BrokerError::InvalidRequest(_))
    ));
    assert_eq!(exchange.call_count("edit_order"), 0);
}

#[tokio::test(start_paused = true)]
async fn cash_reads_the_cache_without_network_calls() {
    let (exchange, mut broker) = setup("kraken");
    assert_eq!(broker.cash(), Decimal::ZERO);

    exchange.push_balance(Ok(json!({
        "free": { "USDT": "150.5" },
        "used": { "USDT": "49.5" },
        "total": { "USDT": "200" }
    })));
    broker.refresh_balance().await.unwrap();

    assert_eq!(broker.cash(), dec!(150.5));
    assert_eq!(broker.cash(), dec!(150.5));
    assert_eq!(broker.value(), dec!(200));
    assert_eq!(exchange.call_count("fetch_balance"), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_balance_refresh_keeps_previous_snapshot() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_balance(Ok(json!({ "free": { "USDT": 10 }, "total": { "USDT": 10 } })));
    broker.refresh_balance().await.unwrap();

    exchange.push_balance(Err(ApiError::Authentication("key revoked".into())));
    assert!(broker.get_wallet_balance(&Params::new()).await.is_err());
    assert_eq!(broker.cash(), dec!(10));
}

#[tokio::test(start_paused = true)]
async fn raw_call_and_open_orders_pass_through() {
    let (exchange, broker) = setup("kraken");
    exchange.push_private(Ok(json!({ "positions": [] })));
    exchange.push_open_orders(Ok(vec![payload("9", "open", "0", "1")]));

    let raw = broker
        .raw_call(HttpMethod::Get, "/private/positions", &Params::new())
        .await
        .unwrap();
    assert_eq!(raw, json!({ "positions": [] }));

    let open = broker.fetch_open_orders(Some("BNB/USDT")).await.unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn closed_orders_and_positions_pass_through() {
    let (exchange, broker) = setup("kraken");
    exchange.push_closed_orders(Ok(vec![payload("8", "closed", "1", "0")]));
    exchange.push_positions(Ok(vec![json!({ "symbol": "BTC/USD:BTC", "contracts": 3 })]));

    let closed = broker.fetch_closed_orders(Some("BNB/USDT"), None, Some(50)).await.unwrap();
    assert_eq!(closed[0]["id"], "8");

    let positions = broker.fetch_positions(&["BTC/USD:BTC".to_string()]).await.unwrap();
    assert_eq!(positions[0]["contracts"], 3);
    assert_eq!(exchange.calls().last().unwrap().target, "BTC/USD:BTC");
}

#[tokio::test(start_paused = true)]
async fn swapped_overrides_apply_to_the_next_submit() {
    let (exchange, mut broker) = setup("kraken");
    exchange.push_create(Ok(payload("1", "open", "0", "1")));
    exchange.push_create(Ok(payload("2", "open", "0", "1")));

    let request = || OrderRequest::limit("BNB/USDT", OrderSide::Buy, dec!(1), dec!(100));
    broker.submit(request()).await.unwrap();
    broker.set_mapping_overrides(MappingTable::empty().with_order_type(OrderType::Limit, "LIMIT_MAKER"));
    broker.submit(request()).await.unwrap();

    let created = exchange.created_orders();
    assert_eq!(created[0].order_type, "limit");
    assert_eq!(created[1].order_type, "LIMIT_MAKER");
    assert_eq!(broker.open_orders()[0].exchange_type, "limit");
}
