//! A scripted, in-memory `ExchangeApi` for tests.
//!
//! Each operation has its own queue of canned results. Calls pop from the front; an empty
//! queue answers `ApiError::NotSupported` so an unscripted call shows up as a test failure.

use crate::error::ApiError;
use crate::requests::{CreateOrder, HttpMethod, OhlcvQuery};
use crate::ExchangeApi;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Candle, Params};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

/// One recorded call against the mock.
#[derive(Debug, Clone)]
pub struct Call {
    pub operation: &'static str,
    /// Order id, symbol or path, depending on the operation.
    pub target: String,
    pub at: Instant,
}

#[derive(Default)]
struct Script {
    create: VecDeque<Result<Value, ApiError>>,
    cancel: VecDeque<Result<Value, ApiError>>,
    fetch: VecDeque<Result<Value, ApiError>>,
    fetch_by_client_id: VecDeque<Result<Value, ApiError>>,
    edit: VecDeque<Result<Value, ApiError>>,
    open_orders: VecDeque<Result<Vec<Value>, ApiError>>,
    closed_orders: VecDeque<Result<Vec<Value>, ApiError>>,
    positions: VecDeque<Result<Vec<Value>, ApiError>>,
    balance: VecDeque<Result<Value, ApiError>>,
    ohlcv: VecDeque<Result<Vec<Candle>, ApiError>>,
    private: VecDeque<Result<Value, ApiError>>,
    calls: Vec<Call>,
    created: Vec<CreateOrder>,
    edited: Vec<(String, CreateOrder)>,
    ohlcv_queries: Vec<OhlcvQuery>,
}

pub struct ScriptedExchange {
    id: String,
    script: Mutex<Script>,
}

impl ScriptedExchange {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), script: Mutex::new(Script::default()) }
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut script = self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut script)
    }

    pub fn push_create(&self, result: Result<Value, ApiError>) {
        self.with_script(|s| s.create.push_back(result));
    }

    pub fn push_cancel(&self, result: Result<Value, ApiError>) {
        self.with_script(|s| s.cancel.push_back(result));
    }

    pub fn push_fetch(&self, result: Result<Value, ApiError>) {
        self.with_script(|s| s.fetch.push_back(result));
    }

    pub fn push_fetch_by_client_id(&self, result: Result<Value, ApiError>) {
        self.with_script(|s| s.fetch_by_client_id.push_back(result));
    }

    pub fn push_edit(&self, result: Result<Value, ApiError>) {
        self.with_script(|s| s.edit.push_back(result));
    }

    pub fn push_open_orders(&self, result: Result<Vec<Value>, ApiError>) {
        self.with_script(|s| s.open_orders.push_back(result));
    }

    pub fn push_closed_orders(&self, result: Result<Vec<Value>, ApiError>) {
        self.with_script(|s| s.closed_orders.push_back(result));
    }

    pub fn push_positions(&self, result: Result<Vec<Value>, ApiError>) {
        self.with_script(|s| s.positions.push_back(result));
    }

    pub fn push_balance(&self, result: Result<Value, ApiError>) {
        self.with_script(|s| s.balance.push_back(result));
    }

    pub fn push_ohlcv(&self, result: Result<Vec<Candle>, ApiError>) {
        self.with_script(|s| s.ohlcv.push_back(result));
    }

    pub fn push_private(&self, result: Result<Value, ApiError>) {
        self.with_script(|s| s.private.push_back(result));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_script(|s| s.calls.clone())
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.with_script(|s| s.calls.iter().filter(|c| c.operation == operation).count())
    }

    /// Every create-order call received, in order.
    pub fn created_orders(&self) -> Vec<CreateOrder> {
        self.with_script(|s| s.created.clone())
    }

    /// Every edit-order call received, with the id of the order it replaced.
    pub fn edited_orders(&self) -> Vec<(String, CreateOrder)> {
        self.with_script(|s| s.edited.clone())
    }

    pub fn ohlcv_queries(&self) -> Vec<OhlcvQuery> {
        self.with_script(|s| s.ohlcv_queries.clone())
    }

    fn record(&self, script: &mut Script, operation: &'static str, target: &str) {
        script.calls.push(Call { operation, target: target.to_string(), at: Instant::now() });
    }
}

fn unscripted<T>(operation: &str) -> Result<T, ApiError> {
    Err(ApiError::NotSupported(format!("no scripted response for {}", operation)))
}

#[async_trait]
impl ExchangeApi for ScriptedExchange {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_order(&self, order: &CreateOrder) -> Result<Value, ApiError> {
        self.with_script(|s| {
            self.record(s, "create_order", &order.symbol);
            s.created.push(order.clone());
            s.create.pop_front().unwrap_or_else(|| unscripted("create_order"))
        })
    }

    async fn cancel_order(&self, id: &str, _symbol: &str) -> Result<Value, ApiError> {
        self.with_script(|s| {
            self.record(s, "cancel_order", id);
            s.cancel.pop_front().unwrap_or_else(|| unscripted("cancel_order"))
        })
    }

    async fn fetch_order(&self, id: &str, _symbol: &str) -> Result<Value, ApiError> {
        self.with_script(|s| {
            self.record(s, "fetch_order", id);
            s.fetch.pop_front().unwrap_or_else(|| unscripted("fetch_order"))
        })
    }

    async fn fetch_order_by_client_id(&self, client_id: &str, _symbol: &str) -> Result<Value, ApiError> {
        self.with_script(|s| {
            self.record(s, "fetch_order_by_client_id", client_id);
            s.fetch_by_client_id
                .pop_front()
                .unwrap_or_else(|| unscripted("fetch_order_by_client_id"))
        })
    }

    async fn edit_order(&self, id: &str, order: &CreateOrder) -> Result<Value, ApiError> {
        self.with_script(|s| {
            self.record(s, "edit_order", id);
            s.edited.push((id.to_string(), order.clone()));
            s.edit.pop_front().unwrap_or_else(|| unscripted("edit_order"))
        })
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Value>, ApiError> {
        self.with_script(|s| {
            self.record(s, "fetch_open_orders", symbol.unwrap_or(""));
            s.open_orders.pop_front().unwrap_or_else(|| unscripted("fetch_open_orders"))
        })
    }

    async fn fetch_closed_orders(
        &self,
        symbol: Option<&str>,
        _since: Option<DateTime<Utc>>,
        _limit: Option<usize>,
    ) -> Result<Vec<Value>, ApiError> {
        self.with_script(|s| {
            self.record(s, "fetch_closed_orders", symbol.unwrap_or(""));
            s.closed_orders.pop_front().unwrap_or_else(|| unscripted("fetch_closed_orders"))
        })
    }

    async fn fetch_positions(&self, symbols: &[String]) -> Result<Vec<Value>, ApiError> {
        self.with_script(|s| {
            self.record(s, "fetch_positions", &symbols.join(","));
            s.positions.pop_front().unwrap_or_else(|| unscripted("fetch_positions"))
        })
    }

    async fn fetch_balance(&self, _params: &Params) -> Result<Value, ApiError> {
        self.with_script(|s| {
            self.record(s, "fetch_balance", "");
            s.balance.pop_front().unwrap_or_else(|| unscripted("fetch_balance"))
        })
    }

    async fn fetch_ohlcv(&self, query: &OhlcvQuery) -> Result<Vec<Candle>, ApiError> {
        self.with_script(|s| {
            self.record(s, "fetch_ohlcv", &query.symbol);
            s.ohlcv_queries.push(query.clone());
            s.ohlcv.pop_front().unwrap_or_else(|| unscripted("fetch_ohlcv"))
        })
    }

    async fn private_call(
        &self,
        _method: HttpMethod,
        path: &str,
        _params: &Params,
    ) -> Result<Value, ApiError> {
        self.with_script(|s| {
            self.record(s, "private_call", path);
            s.private.pop_front().unwrap_or_else(|| unscripted("private_call"))
        })
    }
}
