// =============================================================================
// Test doubles — scripted broker, fixed clock, wiring helpers
// =============================================================================
//
// The MockBroker is fully programmable: scripted clock answers, per-order
// status sequences, injectable failures for every operation, and call
// recording. Used by unit tests across the crate.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::broker::types::{
    AccountInfo, BrokerClockInfo, BrokerError, BrokerOrder, BrokerOrderStatus, BrokerPosition,
    OrderRequest,
};
use crate::broker::BrokerApi;
use crate::clock::Clock;
use crate::data::bar::Bar;
use crate::events::EventBus;
use crate::execution::symbols::SymbolProperties;
use crate::state::transaction_log::TransactionLog;

// ---------------------------------------------------------------------------
// Fixed clock
// ---------------------------------------------------------------------------

/// Settable clock for deterministic time-dependent tests.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ---------------------------------------------------------------------------
// Mock broker
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockBroker {
    // clock
    clock_queue: Mutex<VecDeque<BrokerClockInfo>>,
    clock_last: Mutex<Option<BrokerClockInfo>>,
    clock_fail: Mutex<Option<String>>,
    clock_call_count: AtomicU32,

    // account
    account: Mutex<Option<AccountInfo>>,
    account_fail: Mutex<Option<String>>,
    account_call_count: AtomicU32,

    // bars
    bars: Mutex<HashMap<String, Vec<Bar>>>,
    bars_fail: Mutex<Option<String>>,

    // orders
    order_requests: Mutex<Vec<OrderRequest>>,
    submit_fail: Mutex<Option<(bool, String)>>,
    next_id: AtomicU32,
    status_scripts: Mutex<HashMap<String, VecDeque<BrokerOrder>>>,
    submitted: Mutex<HashMap<String, BrokerOrder>>,
    open_orders: Mutex<Vec<BrokerOrder>>,

    // cancels
    cancel_fail_all: Mutex<Option<String>>,
    cancel_fail_ids: Mutex<HashSet<String>>,
    cancelled: Mutex<Vec<String>>,

    // positions / symbols
    positions: Mutex<Vec<BrokerPosition>>,
    positions_fail: Mutex<Option<String>>,
    open_orders_fail: Mutex<Option<String>>,
    untradable: Mutex<HashSet<String>>,
    fractionable: Mutex<HashSet<String>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- clock scripting --------------------------------------------------

    pub fn push_clock(&self, info: BrokerClockInfo) {
        self.clock_queue.lock().push_back(info);
    }

    pub fn fail_clock(&self, message: &str) {
        *self.clock_fail.lock() = Some(message.to_string());
    }

    pub fn clock_calls(&self) -> u32 {
        self.clock_call_count.load(Ordering::SeqCst)
    }

    // ---- account scripting ------------------------------------------------

    pub fn set_account(&self, portfolio_value: &str, buying_power: &str) {
        *self.account.lock() = Some(AccountInfo {
            portfolio_value: portfolio_value.to_string(),
            buying_power: buying_power.to_string(),
            equity: portfolio_value.to_string(),
            daytrade_count: 0,
        });
    }

    pub fn fail_account(&self, message: &str) {
        *self.account_fail.lock() = Some(message.to_string());
    }

    pub fn clear_account_failure(&self) {
        *self.account_fail.lock() = None;
    }

    pub fn account_calls(&self) -> u32 {
        self.account_call_count.load(Ordering::SeqCst)
    }

    // ---- bar scripting ----------------------------------------------------

    pub fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.bars.lock().insert(symbol.to_uppercase(), bars);
    }

    pub fn fail_bars(&self, message: &str) {
        *self.bars_fail.lock() = Some(message.to_string());
    }

    // ---- order scripting --------------------------------------------------

    pub fn submit_calls(&self) -> u32 {
        self.order_requests.lock().len() as u32
    }

    pub fn last_order_request(&self) -> Option<OrderRequest> {
        self.order_requests.lock().last().cloned()
    }

    pub fn order_requests(&self) -> Vec<OrderRequest> {
        self.order_requests.lock().clone()
    }

    pub fn fail_submits(&self, transient: bool, message: &str) {
        *self.submit_fail.lock() = Some((transient, message.to_string()));
    }

    /// Queue a status answer for one broker order id. Answers are served in
    /// order; the last one repeats once the queue is drained.
    pub fn script_status(
        &self,
        broker_order_id: &str,
        status: BrokerOrderStatus,
        filled_qty: Decimal,
        filled_avg_price: Option<Decimal>,
    ) {
        let template = self
            .submitted
            .lock()
            .get(broker_order_id)
            .cloned()
            .unwrap_or_else(|| BrokerOrder {
                id: broker_order_id.to_string(),
                client_order_id: None,
                symbol: "SPY".into(),
                side: crate::types::OrderSide::Buy,
                order_type: crate::types::OrderType::Market,
                qty: filled_qty,
                limit_price: None,
                stop_price: None,
                status,
                filled_qty,
                filled_avg_price,
            });

        let mut order = template;
        order.status = status;
        order.filled_qty = filled_qty;
        order.filled_avg_price = filled_avg_price;

        self.status_scripts
            .lock()
            .entry(broker_order_id.to_string())
            .or_default()
            .push_back(order);
    }

    /// Replace any script with a single repeating status (zero fill).
    pub fn hold_status(&self, broker_order_id: &str, status: BrokerOrderStatus) {
        self.status_scripts.lock().remove(broker_order_id);
        self.script_status(broker_order_id, status, Decimal::ZERO, None);
    }

    pub fn set_open_orders(&self, orders: Vec<BrokerOrder>) {
        *self.open_orders.lock() = orders;
    }

    // ---- cancel scripting -------------------------------------------------

    pub fn fail_cancels(&self, message: &str) {
        *self.cancel_fail_all.lock() = Some(message.to_string());
    }

    pub fn fail_cancel_for(&self, broker_order_id: &str) {
        self.cancel_fail_ids.lock().insert(broker_order_id.to_string());
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    // ---- position / symbol scripting --------------------------------------

    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        *self.positions.lock() = positions;
    }

    pub fn fail_positions(&self, message: &str) {
        *self.positions_fail.lock() = Some(message.to_string());
    }

    pub fn fail_open_orders(&self, message: &str) {
        *self.open_orders_fail.lock() = Some(message.to_string());
    }

    pub fn set_symbol_untradable(&self, symbol: &str) {
        self.untradable.lock().insert(symbol.to_uppercase());
    }

    pub fn set_symbol_fractionable(&self, symbol: &str) {
        self.fractionable.lock().insert(symbol.to_uppercase());
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn get_clock(&self) -> Result<BrokerClockInfo, BrokerError> {
        self.clock_call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.clock_fail.lock().clone() {
            return Err(BrokerError::transient("get_clock", msg));
        }

        if let Some(next) = self.clock_queue.lock().pop_front() {
            *self.clock_last.lock() = Some(next.clone());
            return Ok(next);
        }
        if let Some(last) = self.clock_last.lock().clone() {
            return Ok(last);
        }
        Ok(BrokerClockInfo {
            is_open: false,
            next_open: None,
            next_close: None,
        })
    }

    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError> {
        self.account_call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.account_fail.lock().clone() {
            return Err(BrokerError::transient("get_account_info", msg));
        }
        Ok(self.account.lock().clone().unwrap_or(AccountInfo {
            portfolio_value: "100000".into(),
            buying_power: "100000".into(),
            equity: "100000".into(),
            daytrade_count: 0,
        }))
    }

    async fn get_bars(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Bar>, BrokerError> {
        if let Some(msg) = self.bars_fail.lock().clone() {
            return Err(BrokerError::transient("get_bars", msg));
        }
        let bars = self
            .bars
            .lock()
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_default();
        let start = bars.len().saturating_sub(limit as usize);
        Ok(bars[start..].to_vec())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<BrokerOrder, BrokerError> {
        if let Some((transient, msg)) = self.submit_fail.lock().clone() {
            return Err(if transient {
                BrokerError::transient("submit_order", msg)
            } else {
                BrokerError::permanent("submit_order", 422, msg)
            });
        }

        self.order_requests.lock().push(request.clone());

        let id = format!("brk-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let order = BrokerOrder {
            id: id.clone(),
            client_order_id: Some(request.client_order_id.clone()),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            qty: request.qty,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            status: BrokerOrderStatus::New,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
        };
        self.submitted.lock().insert(id, order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        if let Some(msg) = self.cancel_fail_all.lock().clone() {
            return Err(BrokerError::permanent("cancel_order", 422, msg));
        }
        if self.cancel_fail_ids.lock().contains(broker_order_id) {
            return Err(BrokerError::permanent(
                "cancel_order",
                422,
                format!("{broker_order_id} not cancellable"),
            ));
        }
        self.cancelled.lock().push(broker_order_id.to_string());
        Ok(())
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<BrokerOrder, BrokerError> {
        {
            let mut scripts = self.status_scripts.lock();
            if let Some(queue) = scripts.get_mut(broker_order_id) {
                if queue.len() > 1 {
                    return Ok(queue.pop_front().expect("non-empty queue"));
                }
                if let Some(front) = queue.front() {
                    return Ok(front.clone());
                }
            }
        }
        self.submitted
            .lock()
            .get(broker_order_id)
            .cloned()
            .ok_or_else(|| {
                BrokerError::permanent("get_order_status", 404, format!("{broker_order_id} unknown"))
            })
    }

    async fn list_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError> {
        if let Some(msg) = self.open_orders_fail.lock().clone() {
            return Err(BrokerError::transient("list_open_orders", msg));
        }
        Ok(self.open_orders.lock().clone())
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        if let Some(msg) = self.positions_fail.lock().clone() {
            return Err(BrokerError::transient("list_positions", msg));
        }
        Ok(self.positions.lock().clone())
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolProperties, BrokerError> {
        let key = symbol.to_uppercase();
        let mut props = SymbolProperties::us_equity_defaults(&key);
        if self.untradable.lock().contains(&key) {
            props.is_tradable = false;
        }
        if self.fractionable.lock().contains(&key) {
            props.is_fractionable = true;
        }
        Ok(props)
    }
}

// ---------------------------------------------------------------------------
// Wiring helpers
// ---------------------------------------------------------------------------

pub fn test_txlog() -> (Arc<TransactionLog>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = TransactionLog::open(dir.path().join("transactions.jsonl")).expect("txlog");
    (Arc::new(log), dir)
}

pub fn test_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}
