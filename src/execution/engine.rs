// =============================================================================
// Execution engine — the only component that submits or cancels orders
// =============================================================================
//
// Guarantees:
//   - Idempotency: an internal order id recorded in the transaction log
//     (this run or any previous one) is never submitted again. The id is
//     reserved BEFORE the broker call.
//   - Metadata/broker agreement: quantities and prices are rounded via the
//     symbol properties before they are stored anywhere.
//   - Incremental fill accounting: the broker reports cumulative filled
//     quantity; positions are updated only with the increment since the
//     last observation, at the reported average price.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::broker::types::{BrokerError, BrokerOrder, BrokerOrderStatus, OrderRequest};
use crate::broker::BrokerApi;
use crate::clock::Clock;
use crate::execution::symbols::SymbolPropertiesCache;
use crate::orders::machine::{OrderState, OrderStateError, OrderStateMachine};
use crate::orders::tracker::{FillEvent, InFlightOrder, OrderTracker, OrderUpdate};
use crate::state::position_store::{Position, PositionStore};
use crate::state::transaction_log::{TransactionLog, TransactionLogError};
use crate::types::{OrderSide, OrderType};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("duplicate internal order id: {0}")]
    DuplicateOrder(String),

    #[error("order validation failed for {symbol}: {reason}")]
    Validation { symbol: String, reason: String },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    State(#[from] OrderStateError),

    #[error(transparent)]
    Log(#[from] TransactionLogError),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct SubmitSpec<'a> {
    internal_order_id: &'a str,
    symbol: &'a str,
    side: OrderSide,
    order_type: OrderType,
    quantity: Decimal,
    limit_price: Option<Decimal>,
    stop_price: Option<Decimal>,
    strategy: &'a str,
}

pub struct ExecutionEngine {
    broker: Arc<dyn BrokerApi>,
    machine: Arc<OrderStateMachine>,
    tracker: Arc<OrderTracker>,
    positions: Arc<PositionStore>,
    txlog: Arc<TransactionLog>,
    symbols: Arc<SymbolPropertiesCache>,
    clock: Arc<dyn Clock>,
    /// Internal ids ever submitted (reloaded from the transaction log).
    submitted_ids: Mutex<HashSet<String>>,
    /// internal id -> cumulative filled qty observed so far.
    cumulative_fills: Mutex<HashMap<String, Decimal>>,
}

impl ExecutionEngine {
    /// Build the engine, reloading the submitted-id set from the
    /// transaction log for cross-restart idempotency.
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        machine: Arc<OrderStateMachine>,
        tracker: Arc<OrderTracker>,
        positions: Arc<PositionStore>,
        txlog: Arc<TransactionLog>,
        symbols: Arc<SymbolPropertiesCache>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TransactionLogError> {
        let submitted = txlog.submitted_order_ids()?;
        info!(known_submissions = submitted.len(), "execution engine initialised");

        Ok(Self {
            broker,
            machine,
            tracker,
            positions,
            txlog,
            symbols,
            clock,
            submitted_ids: Mutex::new(submitted),
            cumulative_fills: Mutex::new(HashMap::new()),
        })
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Submit a MARKET order. Returns the broker order id.
    pub async fn submit_market_order(
        &self,
        internal_order_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        strategy: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<String, ExecutionError> {
        if stop_loss.is_some() || take_profit.is_some() {
            info!(
                internal_order_id,
                stop_loss = ?stop_loss,
                take_profit = ?take_profit,
                "market order carries protection levels"
            );
        }
        self.submit_internal(SubmitSpec {
            internal_order_id,
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            stop_price: None,
            strategy,
        })
        .await
    }

    /// Submit a LIMIT order. The limit price must align with the tick size
    /// after rounding. Returns the broker order id.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_limit_order(
        &self,
        internal_order_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
        strategy: &str,
        _stop_loss: Option<Decimal>,
        _take_profit: Option<Decimal>,
    ) -> Result<String, ExecutionError> {
        self.submit_internal(SubmitSpec {
            internal_order_id,
            symbol,
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit_price),
            stop_price: None,
            strategy,
        })
        .await
    }

    /// Submit a STOP order (protective stops). Returns the broker order id.
    pub async fn submit_stop_order(
        &self,
        internal_order_id: &str,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
        reason: &str,
    ) -> Result<String, ExecutionError> {
        info!(internal_order_id, symbol, %stop_price, reason, "submitting stop order");
        self.submit_internal(SubmitSpec {
            internal_order_id,
            symbol,
            side,
            order_type: OrderType::Stop,
            quantity,
            limit_price: None,
            stop_price: Some(stop_price),
            strategy: reason,
        })
        .await
    }

    async fn submit_internal(&self, spec: SubmitSpec<'_>) -> Result<String, ExecutionError> {
        let props = self.symbols.get(spec.symbol).await?;

        // Round BEFORE storing any metadata so that what we remember is
        // exactly what the broker receives.
        let quantity = props.round_quantity(spec.quantity);
        let limit_price = spec.limit_price.map(|p| props.round_price(p));
        let stop_price = spec.stop_price.map(|p| props.round_price(p));

        props
            .validate_order(quantity, limit_price, spec.side)
            .map_err(|reason| ExecutionError::Validation {
                symbol: spec.symbol.to_string(),
                reason,
            })?;

        // Idempotency gate: reserve the id before any broker interaction.
        {
            let mut ids = self.submitted_ids.lock();
            if ids.contains(spec.internal_order_id) {
                warn!(
                    internal_order_id = spec.internal_order_id,
                    "duplicate submission blocked before broker call"
                );
                return Err(ExecutionError::DuplicateOrder(
                    spec.internal_order_id.to_string(),
                ));
            }
            ids.insert(spec.internal_order_id.to_string());
        }

        self.txlog.append(
            "order_submitted",
            json!({
                "internal_order_id": spec.internal_order_id,
                "symbol": spec.symbol.to_uppercase(),
                "side": spec.side.to_string(),
                "qty": quantity.to_string(),
                "order_type": spec.order_type.to_string(),
                "limit_price": limit_price.map(|p| p.to_string()),
                "stop_price": stop_price.map(|p| p.to_string()),
                "strategy": spec.strategy,
            }),
        )?;

        let now = self.clock.now_utc();
        self.machine.create(spec.internal_order_id)?;
        self.machine
            .transition(spec.internal_order_id, OrderState::Validated, None)?;

        self.tracker.start_tracking(InFlightOrder::new(
            spec.internal_order_id,
            spec.symbol,
            spec.side,
            spec.order_type,
            quantity,
            limit_price,
            stop_price,
            spec.strategy,
            now,
        ));
        self.tracker.process_order_update(
            spec.internal_order_id,
            OrderUpdate {
                broker_order_id: None,
                status: Some(OrderState::Validated),
                submitted_at: None,
            },
            now,
        );

        let request = OrderRequest {
            client_order_id: spec.internal_order_id.to_string(),
            symbol: spec.symbol.to_uppercase(),
            side: spec.side,
            order_type: spec.order_type,
            qty: quantity,
            limit_price,
            stop_price,
            time_in_force: "day".to_string(),
        };

        match self.broker.submit_order(&request).await {
            Ok(border) => {
                self.machine.transition(
                    spec.internal_order_id,
                    OrderState::Submitted,
                    Some(&border.id),
                )?;
                self.tracker.process_order_update(
                    spec.internal_order_id,
                    OrderUpdate {
                        broker_order_id: Some(border.id.clone()),
                        status: Some(OrderState::Submitted),
                        submitted_at: Some(self.clock.now_utc()),
                    },
                    self.clock.now_utc(),
                );

                // Market orders can come back already accepted or filled.
                if border.status != BrokerOrderStatus::PendingNew {
                    self.handle_status_change(spec.internal_order_id, &border);
                }

                info!(
                    internal_order_id = spec.internal_order_id,
                    broker_order_id = %border.id,
                    symbol = %request.symbol,
                    side = %request.side,
                    qty = %request.qty,
                    order_type = %request.order_type,
                    "order submitted"
                );
                Ok(border.id)
            }
            Err(e) => {
                error!(
                    internal_order_id = spec.internal_order_id,
                    error = %e,
                    "broker submission failed"
                );
                self.tracker.process_order_update(
                    spec.internal_order_id,
                    OrderUpdate {
                        broker_order_id: None,
                        status: Some(OrderState::Rejected),
                        submitted_at: None,
                    },
                    self.clock.now_utc(),
                );
                Err(e.into())
            }
        }
    }

    // -------------------------------------------------------------------------
    // Polling
    // -------------------------------------------------------------------------

    /// Poll the broker until the order reaches a terminal state or the
    /// timeout elapses. Returns the last observed state.
    pub async fn wait_for_order(
        &self,
        internal_order_id: &str,
        broker_order_id: &str,
        timeout_seconds: u64,
        poll_interval: Duration,
    ) -> OrderState {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);

        loop {
            match self.broker.get_order_status(broker_order_id).await {
                Ok(border) => {
                    let state = self.handle_status_change(internal_order_id, &border);
                    if state.is_terminal() {
                        return state;
                    }
                }
                Err(e) => {
                    warn!(internal_order_id, broker_order_id, error = %e, "order status poll failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return self.current_state(internal_order_id);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    fn current_state(&self, internal_order_id: &str) -> OrderState {
        self.machine
            .state_of(internal_order_id)
            .or_else(|| self.tracker.in_flight(internal_order_id).map(|o| o.current_state))
            .or_else(|| self.tracker.completed(internal_order_id).map(|o| o.current_state))
            .unwrap_or(OrderState::Submitted)
    }

    /// Process one observed broker order snapshot: aggregate fills
    /// incrementally, drive the state machine, and update the tracker.
    /// Returns the resulting order state.
    pub fn handle_status_change(&self, internal_order_id: &str, border: &BrokerOrder) -> OrderState {
        let now = self.clock.now_utc();

        // ---- fill aggregation (cumulative -> incremental) -----------------
        let cumulative = border.filled_qty;
        let prior = self
            .cumulative_fills
            .lock()
            .get(internal_order_id)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let incremental = cumulative - prior;

        if incremental > Decimal::ZERO {
            self.cumulative_fills
                .lock()
                .insert(internal_order_id.to_string(), cumulative);

            let price = border.filled_avg_price.unwrap_or(Decimal::ZERO);
            self.tracker
                .process_fill(internal_order_id, FillEvent::new(now, incremental, price));

            if let Some(order) = self.tracker.in_flight(internal_order_id) {
                let result = match order.side {
                    OrderSide::Buy => self.positions.upsert(Position {
                        symbol: order.symbol.clone(),
                        qty: incremental,
                        entry_price: price,
                        entry_time: now,
                        strategy: order.strategy.clone(),
                        order_id: internal_order_id.to_string(),
                        stop_loss: None,
                        take_profit: None,
                    }),
                    OrderSide::Sell => self.positions.reduce(&order.symbol, incremental),
                };
                if let Err(e) = result {
                    error!(internal_order_id, error = %e, "position update after fill failed");
                }
            }
        }

        // ---- state machine ------------------------------------------------
        let target = match border.status {
            BrokerOrderStatus::New | BrokerOrderStatus::Accepted | BrokerOrderStatus::Held => {
                Some(OrderState::Accepted)
            }
            BrokerOrderStatus::PartiallyFilled => Some(OrderState::PartiallyFilled),
            BrokerOrderStatus::Filled => Some(OrderState::Filled),
            BrokerOrderStatus::Canceled => Some(OrderState::Cancelled),
            BrokerOrderStatus::Rejected => Some(OrderState::Rejected),
            BrokerOrderStatus::Expired => Some(OrderState::Expired),
            BrokerOrderStatus::PendingNew | BrokerOrderStatus::Unknown => None,
        };

        let state = match target {
            Some(target) => {
                if self.machine.state_of(internal_order_id) != Some(target) {
                    if let Err(e) =
                        self.machine
                            .advance_to(internal_order_id, target, Some(&border.id))
                    {
                        warn!(internal_order_id, error = %e, "state machine rejected broker status");
                    }
                }
                self.tracker.process_order_update(
                    internal_order_id,
                    OrderUpdate {
                        broker_order_id: Some(border.id.clone()),
                        status: Some(target),
                        submitted_at: None,
                    },
                    now,
                );
                target
            }
            None => self.current_state(internal_order_id),
        };

        if state.is_terminal() {
            self.cumulative_fills.lock().remove(internal_order_id);
        }
        state
    }

    // -------------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------------

    /// Cancel an order at the broker. Returns true on success.
    pub async fn cancel_order(
        &self,
        internal_order_id: &str,
        broker_order_id: &str,
        reason: &str,
    ) -> bool {
        match self.broker.cancel_order(broker_order_id).await {
            Ok(()) => {
                info!(internal_order_id, broker_order_id, reason, "order cancelled");
                if let Err(e) =
                    self.machine
                        .advance_to(internal_order_id, OrderState::Cancelled, Some(broker_order_id))
                {
                    // Cancelling an already-terminal order is fine; keep truth.
                    warn!(internal_order_id, error = %e, "cancel transition rejected");
                }
                self.tracker.process_order_update(
                    internal_order_id,
                    OrderUpdate {
                        broker_order_id: Some(broker_order_id.to_string()),
                        status: Some(OrderState::Cancelled),
                        submitted_at: None,
                    },
                    self.clock.now_utc(),
                );
                self.cumulative_fills.lock().remove(internal_order_id);
                true
            }
            Err(e) => {
                warn!(internal_order_id, broker_order_id, error = %e, "cancel failed");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Filled quantity and average price, or `(None, None)` when nothing
    /// has filled yet.
    pub fn get_fill_details(&self, internal_order_id: &str) -> (Option<Decimal>, Option<Decimal>) {
        let order = self
            .tracker
            .in_flight(internal_order_id)
            .or_else(|| self.tracker.completed(internal_order_id));

        match order {
            Some(o) if o.filled_quantity > Decimal::ZERO => {
                (Some(o.filled_quantity), o.average_fill_price)
            }
            _ => (None, None),
        }
    }

    /// Open (in-flight) orders for one symbol.
    pub fn open_orders(&self, symbol: &str) -> Vec<InFlightOrder> {
        self.tracker.open_orders_for_symbol(symbol)
    }

    /// Buying power reserved by in-flight BUY LIMIT orders.
    pub fn reserved_buying_power(&self) -> Decimal {
        self.tracker.reserved_buying_power()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::events::EventBus;
    use crate::testing::MockBroker;
    use rust_decimal_macros::dec;

    struct Rig {
        engine: ExecutionEngine,
        broker: Arc<MockBroker>,
        positions: Arc<PositionStore>,
        tracker: Arc<OrderTracker>,
        txlog: Arc<TransactionLog>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MockBroker::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let txlog = Arc::new(TransactionLog::open(dir.path().join("tx.jsonl")).unwrap());
        let bus = Arc::new(EventBus::new());
        let machine = Arc::new(OrderStateMachine::new(txlog.clone(), bus, clock.clone()));
        let tracker = Arc::new(OrderTracker::new());
        let positions = Arc::new(PositionStore::open(dir.path().join("positions.json")).unwrap());
        let symbols = Arc::new(SymbolPropertiesCache::new(broker.clone()));

        let engine = ExecutionEngine::new(
            broker.clone(),
            machine,
            tracker.clone(),
            positions.clone(),
            txlog.clone(),
            symbols,
            clock,
        )
        .unwrap();

        Rig {
            engine,
            broker,
            positions,
            tracker,
            txlog,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn market_submit_transitions_and_returns_broker_id() {
        let r = rig();
        let broker_id = r
            .engine
            .submit_market_order("ord-1", "SPY", OrderSide::Buy, dec!(1), "vwap_micro", None, None)
            .await
            .unwrap();

        assert!(!broker_id.is_empty());
        assert_eq!(r.broker.submit_calls(), 1);
        let order = r.tracker.in_flight("ord-1").unwrap();
        assert_eq!(order.broker_order_id.as_deref(), Some(broker_id.as_str()));
    }

    #[tokio::test]
    async fn duplicate_internal_id_makes_zero_broker_calls() {
        let r = rig();
        r.engine
            .submit_market_order("ord-1", "SPY", OrderSide::Buy, dec!(1), "vwap_micro", None, None)
            .await
            .unwrap();
        assert_eq!(r.broker.submit_calls(), 1);

        let err = r
            .engine
            .submit_market_order("ord-1", "SPY", OrderSide::Buy, dec!(1), "vwap_micro", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::DuplicateOrder(_)));
        assert_eq!(r.broker.submit_calls(), 1, "duplicate must not reach the broker");
    }

    #[tokio::test]
    async fn submitted_ids_reload_from_transaction_log() {
        let dir = tempfile::tempdir().unwrap();
        let txlog_path = dir.path().join("tx.jsonl");
        {
            let txlog = TransactionLog::open(&txlog_path).unwrap();
            txlog
                .append("order_submitted", json!({ "internal_order_id": "ord-old" }))
                .unwrap();
        }

        let broker = Arc::new(MockBroker::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let txlog = Arc::new(TransactionLog::open(&txlog_path).unwrap());
        let machine = Arc::new(OrderStateMachine::new(
            txlog.clone(),
            Arc::new(EventBus::new()),
            clock.clone(),
        ));
        let engine = ExecutionEngine::new(
            broker.clone(),
            machine,
            Arc::new(OrderTracker::new()),
            Arc::new(PositionStore::open(dir.path().join("p.json")).unwrap()),
            txlog,
            Arc::new(SymbolPropertiesCache::new(broker.clone())),
            clock,
        )
        .unwrap();

        let err = engine
            .submit_market_order("ord-old", "SPY", OrderSide::Buy, dec!(1), "s", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::DuplicateOrder(_)));
        assert_eq!(broker.submit_calls(), 0);
    }

    #[tokio::test]
    async fn quantity_is_rounded_before_metadata_storage() {
        let r = rig();
        // SPY defaults: whole shares only. 2.7 rounds down to 2.
        r.engine
            .submit_market_order("ord-1", "SPY", OrderSide::Buy, dec!(2.7), "s", None, None)
            .await
            .unwrap();

        let order = r.tracker.in_flight("ord-1").unwrap();
        assert_eq!(order.quantity, dec!(2));
        // The broker received the same rounded figure.
        assert_eq!(r.broker.last_order_request().unwrap().qty, dec!(2));
        // And the transaction log recorded the rounded figure too.
        let records = r.txlog.read_all().unwrap();
        let submitted = records
            .iter()
            .find(|e| e["event"] == "order_submitted")
            .unwrap();
        assert_eq!(submitted["qty"], "2");
    }

    #[tokio::test]
    async fn partial_fills_aggregate_incrementally() {
        let r = rig();
        let broker_id = r
            .engine
            .submit_market_order("ord-1", "SPY", OrderSide::Buy, dec!(100), "s", None, None)
            .await
            .unwrap();

        // Broker reports cumulative 50, then cumulative 100, both at 100.00.
        r.broker.script_status(
            &broker_id,
            crate::broker::types::BrokerOrderStatus::PartiallyFilled,
            dec!(50),
            Some(dec!(100.00)),
        );
        r.broker.script_status(
            &broker_id,
            crate::broker::types::BrokerOrderStatus::Filled,
            dec!(100),
            Some(dec!(100.00)),
        );

        let state = r
            .engine
            .wait_for_order("ord-1", &broker_id, 5, Duration::from_millis(1))
            .await;
        assert_eq!(state, OrderState::Filled);

        let pos = r.positions.get("SPY").unwrap();
        assert_eq!(pos.qty, dec!(100));
        assert_eq!(pos.entry_price, dec!(100.00));

        // Cumulative tracker cleared after the terminal fill.
        assert!(r.engine.cumulative_fills.lock().is_empty());

        let (filled, avg) = r.engine.get_fill_details("ord-1");
        assert_eq!(filled, Some(dec!(100)));
        assert_eq!(avg, Some(dec!(100.00)));
    }

    #[tokio::test]
    async fn sell_fill_reduces_and_flattens_position() {
        let r = rig();
        // Seed a long position.
        r.positions
            .upsert(Position {
                symbol: "SPY".into(),
                qty: dec!(2),
                entry_price: dec!(100),
                entry_time: chrono::Utc::now(),
                strategy: "s".into(),
                order_id: "seed".into(),
                stop_loss: None,
                take_profit: None,
            })
            .unwrap();

        let broker_id = r
            .engine
            .submit_market_order("ord-1", "SPY", OrderSide::Sell, dec!(2), "s", None, None)
            .await
            .unwrap();
        r.broker.script_status(
            &broker_id,
            crate::broker::types::BrokerOrderStatus::Filled,
            dec!(2),
            Some(dec!(101.00)),
        );

        let state = r
            .engine
            .wait_for_order("ord-1", &broker_id, 5, Duration::from_millis(1))
            .await;
        assert_eq!(state, OrderState::Filled);
        assert!(r.positions.get("SPY").is_none(), "position must be flattened");
    }

    #[tokio::test]
    async fn wait_times_out_on_non_terminal_status() {
        let r = rig();
        let broker_id = r
            .engine
            .submit_limit_order(
                "ord-1",
                "SPY",
                OrderSide::Buy,
                dec!(1),
                dec!(99.90),
                "s",
                None,
                None,
            )
            .await
            .unwrap();

        // Broker keeps answering "accepted" with no fill.
        r.broker.hold_status(
            &broker_id,
            crate::broker::types::BrokerOrderStatus::Accepted,
        );

        let state = r
            .engine
            .wait_for_order("ord-1", &broker_id, 0, Duration::from_millis(1))
            .await;
        assert_eq!(state, OrderState::Accepted);
        assert!(!state.is_terminal());
    }

    #[tokio::test]
    async fn validation_failure_makes_no_broker_call() {
        let r = rig();
        r.broker.set_symbol_untradable("HALT");

        let err = r
            .engine
            .submit_market_order("ord-1", "HALT", OrderSide::Buy, dec!(1), "s", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Validation { .. }));
        assert_eq!(r.broker.submit_calls(), 0);
    }

    #[tokio::test]
    async fn cancel_order_reports_success_and_failure() {
        let r = rig();
        let broker_id = r
            .engine
            .submit_limit_order("ord-1", "SPY", OrderSide::Buy, dec!(1), dec!(99.90), "s", None, None)
            .await
            .unwrap();

        assert!(r.engine.cancel_order("ord-1", &broker_id, "ttl").await);
        assert!(r.tracker.in_flight("ord-1").is_none());
        assert_eq!(
            r.tracker.completed("ord-1").unwrap().current_state,
            OrderState::Cancelled
        );

        r.broker.fail_cancels("gone");
        let broker_id = r
            .engine
            .submit_limit_order("ord-2", "SPY", OrderSide::Buy, dec!(1), dec!(99.90), "s", None, None)
            .await
            .unwrap();
        assert!(!r.engine.cancel_order("ord-2", &broker_id, "ttl").await);
    }
}
