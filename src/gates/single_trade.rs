// =============================================================================
// Single-trade guard — one open position/order per symbol at a time
// =============================================================================
//
// Entry signals are blocked when the symbol already has a non-zero position
// or any open order. Local state is consulted first (position store, then
// the execution engine's in-flight orders); the broker is the fallback.
//
// When the broker fallback itself fails, the policy decides: fail-open
// (paper — allow the entry) or fail-closed (live — block on uncertainty).
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::warn;

use crate::broker::BrokerApi;
use crate::execution::engine::ExecutionEngine;
use crate::state::position_store::PositionStore;

/// Outcome of one entry-guard evaluation, journal-ready.
#[derive(Debug, Clone)]
pub struct SingleTradeVerdict {
    pub blocked: bool,
    pub has_position: Option<bool>,
    pub has_open_order: Option<bool>,
    pub reason: String,
}

impl SingleTradeVerdict {
    fn allow() -> Self {
        Self {
            blocked: false,
            has_position: Some(false),
            has_open_order: Some(false),
            reason: String::new(),
        }
    }

    fn block(has_position: bool, has_open_order: bool) -> Self {
        Self {
            blocked: true,
            has_position: Some(has_position),
            has_open_order: Some(has_open_order),
            reason: "position_or_open_order_exists".to_string(),
        }
    }
}

pub struct SingleTradeGuard {
    /// Block when state cannot be determined. False for paper (fail-open),
    /// true for live (block on uncertainty).
    fail_closed: bool,
}

impl SingleTradeGuard {
    pub fn new(fail_closed: bool) -> Self {
        Self { fail_closed }
    }

    /// Evaluate whether a NEW entry for `symbol` must be blocked.
    pub async fn check_entry(
        &self,
        symbol: &str,
        positions: &PositionStore,
        engine: &ExecutionEngine,
        broker: &Arc<dyn BrokerApi>,
    ) -> SingleTradeVerdict {
        let symbol = symbol.to_uppercase();

        // ---- local position store (authoritative for our own fills) -------
        if positions.has_open_position(&symbol) {
            return SingleTradeVerdict::block(true, false);
        }

        // ---- local in-flight orders ---------------------------------------
        if !engine.open_orders(&symbol).is_empty() {
            return SingleTradeVerdict::block(false, true);
        }

        // ---- broker fallback ----------------------------------------------
        match broker.list_positions().await {
            Ok(broker_positions) => {
                let held = broker_positions
                    .iter()
                    .any(|p| p.symbol == symbol && p.qty != Decimal::ZERO);
                if held {
                    return SingleTradeVerdict::block(true, false);
                }
            }
            Err(e) => return self.on_uncertainty(&symbol, &e.to_string()),
        }

        match broker.list_open_orders().await {
            Ok(broker_orders) => {
                if broker_orders.iter().any(|o| o.symbol == symbol) {
                    return SingleTradeVerdict::block(false, true);
                }
            }
            Err(e) => return self.on_uncertainty(&symbol, &e.to_string()),
        }

        SingleTradeVerdict::allow()
    }

    fn on_uncertainty(&self, symbol: &str, error: &str) -> SingleTradeVerdict {
        warn!(symbol, error, fail_closed = self.fail_closed, "single-trade guard could not determine state");
        SingleTradeVerdict {
            blocked: self.fail_closed,
            has_position: None,
            has_open_order: None,
            reason: format!("guard_error:{error}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::{BrokerOrderStatus, BrokerPosition};
    use crate::clock::SystemClock;
    use crate::events::EventBus;
    use crate::execution::symbols::SymbolPropertiesCache;
    use crate::orders::machine::OrderStateMachine;
    use crate::orders::tracker::OrderTracker;
    use crate::state::position_store::Position;
    use crate::state::transaction_log::TransactionLog;
    use crate::testing::MockBroker;
    use crate::types::{OrderSide, OrderType};
    use rust_decimal_macros::dec;

    struct Rig {
        broker: Arc<MockBroker>,
        broker_dyn: Arc<dyn BrokerApi>,
        positions: Arc<PositionStore>,
        engine: Arc<ExecutionEngine>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MockBroker::new());
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(SystemClock);
        let txlog = Arc::new(TransactionLog::open(dir.path().join("tx.jsonl")).unwrap());
        let machine = Arc::new(OrderStateMachine::new(
            txlog.clone(),
            Arc::new(EventBus::new()),
            clock.clone(),
        ));
        let positions = Arc::new(PositionStore::open(dir.path().join("p.json")).unwrap());
        let engine = Arc::new(
            ExecutionEngine::new(
                broker.clone(),
                machine,
                Arc::new(OrderTracker::new()),
                positions.clone(),
                txlog,
                Arc::new(SymbolPropertiesCache::new(broker.clone())),
                clock,
            )
            .unwrap(),
        );
        Rig {
            broker_dyn: broker.clone(),
            broker,
            positions,
            engine,
            _dir: dir,
        }
    }

    fn position(symbol: &str, qty: Decimal) -> Position {
        Position {
            symbol: symbol.into(),
            qty,
            entry_price: dec!(100),
            entry_time: chrono::Utc::now(),
            strategy: "s".into(),
            order_id: "ord".into(),
            stop_loss: None,
            take_profit: None,
        }
    }

    #[tokio::test]
    async fn blocks_when_local_position_exists() {
        let r = rig();
        r.positions.upsert(position("SPY", dec!(1))).unwrap();

        let guard = SingleTradeGuard::new(false);
        let v = guard
            .check_entry("SPY", &r.positions, &r.engine, &r.broker_dyn)
            .await;
        assert!(v.blocked);
        assert_eq!(v.has_position, Some(true));
        assert_eq!(v.reason, "position_or_open_order_exists");
    }

    #[tokio::test]
    async fn blocks_when_in_flight_order_exists() {
        let r = rig();
        r.engine
            .submit_limit_order("ord-1", "SPY", OrderSide::Buy, dec!(1), dec!(99.90), "s", None, None)
            .await
            .unwrap();

        let guard = SingleTradeGuard::new(false);
        let v = guard
            .check_entry("SPY", &r.positions, &r.engine, &r.broker_dyn)
            .await;
        assert!(v.blocked);
        assert_eq!(v.has_open_order, Some(true));
    }

    #[tokio::test]
    async fn blocks_on_broker_reported_position() {
        let r = rig();
        r.broker.set_positions(vec![BrokerPosition {
            symbol: "SPY".into(),
            qty: dec!(3),
            avg_entry_price: dec!(100),
        }]);

        let guard = SingleTradeGuard::new(false);
        let v = guard
            .check_entry("SPY", &r.positions, &r.engine, &r.broker_dyn)
            .await;
        assert!(v.blocked);
        assert_eq!(v.has_position, Some(true));
    }

    #[tokio::test]
    async fn blocks_on_broker_reported_open_order() {
        let r = rig();
        r.broker.set_open_orders(vec![crate::broker::types::BrokerOrder {
            id: "brk-9".into(),
            client_order_id: None,
            symbol: "SPY".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            qty: dec!(1),
            limit_price: Some(dec!(99)),
            stop_price: None,
            status: BrokerOrderStatus::Accepted,
            filled_qty: dec!(0),
            filled_avg_price: None,
        }]);

        let guard = SingleTradeGuard::new(false);
        let v = guard
            .check_entry("SPY", &r.positions, &r.engine, &r.broker_dyn)
            .await;
        assert!(v.blocked);
        assert_eq!(v.has_open_order, Some(true));
    }

    #[tokio::test]
    async fn clean_symbol_is_allowed() {
        let r = rig();
        let guard = SingleTradeGuard::new(false);
        let v = guard
            .check_entry("SPY", &r.positions, &r.engine, &r.broker_dyn)
            .await;
        assert!(!v.blocked);
    }

    #[tokio::test]
    async fn broker_failure_fails_open_in_paper_policy() {
        let r = rig();
        r.broker.fail_positions("broker unreachable");

        let guard = SingleTradeGuard::new(false);
        let v = guard
            .check_entry("SPY", &r.positions, &r.engine, &r.broker_dyn)
            .await;
        assert!(!v.blocked);
        assert!(v.reason.starts_with("guard_error:"));
        assert_eq!(v.has_position, None);
    }

    #[tokio::test]
    async fn broker_failure_fails_closed_in_live_policy() {
        let r = rig();
        r.broker.fail_open_orders("broker unreachable");

        let guard = SingleTradeGuard::new(true);
        let v = guard
            .check_entry("SPY", &r.positions, &r.engine, &r.broker_dyn)
            .await;
        assert!(v.blocked, "live policy must block on uncertainty");
        assert!(v.reason.starts_with("guard_error:"));
    }
}
