// =============================================================================
// Recovery coordinator — reconstruct runtime state from broker truth
// =============================================================================
//
// SAFETY: persisted local state is never trusted over the broker. On
// startup the coordinator
//   1. cancels every open broker order (stale intent from a dead run),
//   2. rebuilds the position store from broker positions,
//   3. reports a status the runtime maps to its exit code.
//
// Cancel failures are tolerated in paper mode (logged, recovery continues)
// and fatal in live mode.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::broker::BrokerApi;
use crate::clock::Clock;
use crate::state::position_store::{Position, PositionStore};
use crate::types::TradeMode;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStatus {
    /// Local state matched broker truth.
    Success,
    /// Some state recovered, some rebuilt.
    Partial,
    /// State rebuilt wholesale from the broker.
    Rebuilt,
    /// Recovery could not reach a consistent state; the runtime must halt.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub status: RecoveryStatus,
    pub positions_recovered: usize,
    pub positions_rebuilt: usize,
    pub orders_cancelled: usize,
    pub recovery_time_seconds: f64,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct RecoveryCoordinator {
    broker: Arc<dyn BrokerApi>,
    positions: Arc<PositionStore>,
    clock: Arc<dyn Clock>,
    mode: TradeMode,
}

impl RecoveryCoordinator {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        positions: Arc<PositionStore>,
        clock: Arc<dyn Clock>,
        mode: TradeMode,
    ) -> Self {
        Self {
            broker,
            positions,
            clock,
            mode,
        }
    }

    /// Run the full recovery sequence.
    pub async fn recover(&self) -> RecoveryReport {
        let started = Instant::now();
        info!(mode = %self.mode, "recovery started");

        // ---- 1. cancel open broker orders ---------------------------------
        let (orders_cancelled, cancel_failures) = match self.cancel_open_orders().await {
            Ok(counts) => counts,
            Err(report_status) => {
                return RecoveryReport {
                    status: report_status,
                    positions_recovered: 0,
                    positions_rebuilt: 0,
                    orders_cancelled: 0,
                    recovery_time_seconds: started.elapsed().as_secs_f64(),
                };
            }
        };

        if cancel_failures > 0 && self.mode == TradeMode::Live {
            error!(cancel_failures, "live-mode recovery failed: open orders could not be cancelled");
            return RecoveryReport {
                status: RecoveryStatus::Failed,
                positions_recovered: 0,
                positions_rebuilt: 0,
                orders_cancelled,
                recovery_time_seconds: started.elapsed().as_secs_f64(),
            };
        }

        // ---- 2. rebuild positions from broker -----------------------------
        let (recovered, rebuilt) = match self.rebuild_positions().await {
            Ok(counts) => counts,
            Err(()) => {
                return RecoveryReport {
                    status: RecoveryStatus::Failed,
                    positions_recovered: 0,
                    positions_rebuilt: 0,
                    orders_cancelled,
                    recovery_time_seconds: started.elapsed().as_secs_f64(),
                };
            }
        };

        let status = if cancel_failures > 0 || rebuilt > 0 {
            if recovered > 0 {
                RecoveryStatus::Partial
            } else {
                RecoveryStatus::Rebuilt
            }
        } else {
            RecoveryStatus::Success
        };

        let report = RecoveryReport {
            status,
            positions_recovered: recovered,
            positions_rebuilt: rebuilt,
            orders_cancelled,
            recovery_time_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            status = ?report.status,
            positions_recovered = report.positions_recovered,
            positions_rebuilt = report.positions_rebuilt,
            orders_cancelled = report.orders_cancelled,
            "recovery complete"
        );
        report
    }

    /// Cancel every open order. Returns (cancelled, failures) or the report
    /// status when the order list itself cannot be fetched.
    async fn cancel_open_orders(&self) -> Result<(usize, usize), RecoveryStatus> {
        let open_orders = match self.broker.list_open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "recovery could not list open orders");
                return Err(RecoveryStatus::Failed);
            }
        };

        let mut cancelled = 0;
        let mut failures = 0;
        for order in open_orders.iter().filter(|o| o.status.is_open()) {
            match self.broker.cancel_order(&order.id).await {
                Ok(()) => {
                    info!(broker_order_id = %order.id, symbol = %order.symbol, "stale order cancelled");
                    cancelled += 1;
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        broker_order_id = %order.id,
                        symbol = %order.symbol,
                        error = %e,
                        "cancel failed during recovery"
                    );
                }
            }
        }
        Ok((cancelled, failures))
    }

    /// Overwrite the local store with broker positions. Returns
    /// (recovered, rebuilt): recovered = symbols that already matched,
    /// rebuilt = symbols created or corrected from broker truth.
    async fn rebuild_positions(&self) -> Result<(usize, usize), ()> {
        let broker_positions = match self.broker.list_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                error!(error = %e, "recovery could not list broker positions");
                return Err(());
            }
        };

        let mut recovered = 0;
        let mut rebuilt = 0;
        let now = self.clock.now_utc();

        for bp in &broker_positions {
            match self.positions.get(&bp.symbol) {
                Some(local) if local.qty == bp.qty => {
                    recovered += 1;
                }
                _ => {
                    rebuilt += 1;
                    let replaced = self.positions.replace(Position {
                        symbol: bp.symbol.clone(),
                        qty: bp.qty,
                        entry_price: bp.avg_entry_price,
                        entry_time: now,
                        strategy: "recovered".to_string(),
                        order_id: "recovered".to_string(),
                        stop_loss: None,
                        take_profit: None,
                    });
                    if let Err(e) = replaced {
                        error!(symbol = %bp.symbol, error = %e, "position rebuild write failed");
                        return Err(());
                    }
                }
            }
        }

        // Local positions the broker does not hold are phantoms.
        for local in self.positions.all() {
            if !broker_positions.iter().any(|bp| bp.symbol == local.symbol) {
                warn!(symbol = %local.symbol, "dropping phantom local position");
                if let Err(e) = self.positions.delete(&local.symbol) {
                    error!(symbol = %local.symbol, error = %e, "phantom delete failed");
                    return Err(());
                }
                rebuilt += 1;
            }
        }

        Ok((recovered, rebuilt))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::{BrokerOrder, BrokerOrderStatus, BrokerPosition};
    use crate::clock::SystemClock;
    use crate::testing::MockBroker;
    use crate::types::{OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn open_order(id: &str, symbol: &str, status: BrokerOrderStatus) -> BrokerOrder {
        BrokerOrder {
            id: id.into(),
            client_order_id: None,
            symbol: symbol.into(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            qty: dec!(1),
            limit_price: Some(dec!(100)),
            stop_price: None,
            status,
            filled_qty: dec!(0),
            filled_avg_price: None,
        }
    }

    fn rig(mode: TradeMode) -> (RecoveryCoordinator, Arc<MockBroker>, Arc<PositionStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MockBroker::new());
        let positions = Arc::new(PositionStore::open(dir.path().join("p.json")).unwrap());
        let coordinator = RecoveryCoordinator::new(
            broker.clone(),
            positions.clone(),
            Arc::new(SystemClock),
            mode,
        );
        (coordinator, broker, positions, dir)
    }

    #[tokio::test]
    async fn paper_mode_tolerates_cancel_failures_and_rebuilds() {
        let (coordinator, broker, positions, _dir) = rig(TradeMode::Paper);
        broker.set_open_orders(vec![
            open_order("brk-1", "SPY", BrokerOrderStatus::Accepted),
            open_order("brk-2", "QQQ", BrokerOrderStatus::New),
        ]);
        broker.fail_cancel_for("brk-2");
        broker.set_positions(vec![BrokerPosition {
            symbol: "SPY".into(),
            qty: dec!(1),
            avg_entry_price: dec!(100),
        }]);

        let report = coordinator.recover().await;

        // Both cancels attempted, one succeeded.
        assert_eq!(broker.cancelled_ids(), vec!["brk-1".to_string()]);
        assert_eq!(report.orders_cancelled, 1);
        assert_eq!(report.status, RecoveryStatus::Rebuilt);
        assert_eq!(report.positions_rebuilt, 1);
        assert_eq!(positions.get("SPY").unwrap().qty, dec!(1));
    }

    #[tokio::test]
    async fn live_mode_fails_on_cancel_failure() {
        let (coordinator, broker, _positions, _dir) = rig(TradeMode::Live);
        broker.set_open_orders(vec![open_order("brk-1", "SPY", BrokerOrderStatus::Accepted)]);
        broker.fail_cancels("rejected");

        let report = coordinator.recover().await;
        assert_eq!(report.status, RecoveryStatus::Failed);
    }

    #[tokio::test]
    async fn matching_local_positions_count_as_recovered() {
        let (coordinator, broker, positions, _dir) = rig(TradeMode::Paper);
        positions
            .replace(Position {
                symbol: "SPY".into(),
                qty: dec!(2),
                entry_price: dec!(99),
                entry_time: chrono::Utc::now(),
                strategy: "s".into(),
                order_id: "o".into(),
                stop_loss: None,
                take_profit: None,
            })
            .unwrap();
        broker.set_positions(vec![BrokerPosition {
            symbol: "SPY".into(),
            qty: dec!(2),
            avg_entry_price: dec!(99),
        }]);

        let report = coordinator.recover().await;
        assert_eq!(report.status, RecoveryStatus::Success);
        assert_eq!(report.positions_recovered, 1);
        assert_eq!(report.positions_rebuilt, 0);
    }

    #[tokio::test]
    async fn phantom_local_positions_are_dropped() {
        let (coordinator, _broker, positions, _dir) = rig(TradeMode::Paper);
        positions
            .replace(Position {
                symbol: "GME".into(),
                qty: dec!(5),
                entry_price: dec!(20),
                entry_time: chrono::Utc::now(),
                strategy: "s".into(),
                order_id: "o".into(),
                stop_loss: None,
                take_profit: None,
            })
            .unwrap();

        let report = coordinator.recover().await;
        assert_eq!(report.status, RecoveryStatus::Rebuilt);
        assert!(positions.get("GME").is_none());
    }

    #[tokio::test]
    async fn closed_status_orders_are_not_cancelled() {
        let (coordinator, broker, _positions, _dir) = rig(TradeMode::Paper);
        broker.set_open_orders(vec![
            open_order("brk-1", "SPY", BrokerOrderStatus::Filled),
            open_order("brk-2", "SPY", BrokerOrderStatus::Accepted),
        ]);

        let report = coordinator.recover().await;
        assert_eq!(report.orders_cancelled, 1);
        assert_eq!(broker.cancelled_ids(), vec!["brk-2".to_string()]);
    }
}
