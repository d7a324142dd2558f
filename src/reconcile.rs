// =============================================================================
// Startup reconciler — compare local position state against the broker
// =============================================================================
//
// SAFETY POLICY: the broker is the source of truth. In LIVE mode any
// discrepancy at startup halts the runtime (exit code 1). In PAPER mode
// discrepancies are logged, and optionally auto-healed (PAPER_AUTO_HEAL=1)
// by overwriting local state with broker truth; every heal is journaled as
// AUTO_HEAL_APPLIED.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::broker::types::BrokerError;
use crate::broker::BrokerApi;
use crate::clock::Clock;
use crate::journal::JournalWriter;
use crate::state::position_store::{Position, PositionStore};

/// Environment variable enabling paper-mode auto-heal.
pub const PAPER_AUTO_HEAL_ENV: &str = "PAPER_AUTO_HEAL";

// ---------------------------------------------------------------------------
// Discrepancies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscrepancyKind {
    /// Both sides hold the symbol with different quantities.
    QuantityMismatch,
    /// Broker holds a position we do not know about.
    MissingLocal,
    /// We hold a position the broker does not list.
    PhantomLocal,
}

impl std::fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuantityMismatch => write!(f, "position_qty_mismatch"),
            Self::MissingLocal => write!(f, "missing_local_position"),
            Self::PhantomLocal => write!(f, "phantom_local_position"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub symbol: String,
    pub local_qty: Option<Decimal>,
    pub broker_qty: Option<Decimal>,
    pub broker_avg_price: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    broker: Arc<dyn BrokerApi>,
    positions: Arc<PositionStore>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(broker: Arc<dyn BrokerApi>, positions: Arc<PositionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            broker,
            positions,
            clock,
        }
    }

    /// Compare local positions against the broker. Pure read: no healing.
    pub async fn reconcile_startup(&self) -> Result<Vec<Discrepancy>, BrokerError> {
        let broker_positions = self.broker.list_positions().await?;
        let mut discrepancies = Vec::new();

        for bp in &broker_positions {
            match self.positions.get(&bp.symbol) {
                Some(local) if local.qty == bp.qty => {}
                Some(local) => discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::QuantityMismatch,
                    symbol: bp.symbol.clone(),
                    local_qty: Some(local.qty),
                    broker_qty: Some(bp.qty),
                    broker_avg_price: Some(bp.avg_entry_price),
                }),
                None => discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::MissingLocal,
                    symbol: bp.symbol.clone(),
                    local_qty: None,
                    broker_qty: Some(bp.qty),
                    broker_avg_price: Some(bp.avg_entry_price),
                }),
            }
        }

        for local in self.positions.all() {
            if !broker_positions.iter().any(|bp| bp.symbol == local.symbol) {
                discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::PhantomLocal,
                    symbol: local.symbol.clone(),
                    local_qty: Some(local.qty),
                    broker_qty: None,
                    broker_avg_price: None,
                });
            }
        }

        if discrepancies.is_empty() {
            info!("startup reconcile: local state matches broker");
        } else {
            warn!(count = discrepancies.len(), "startup reconcile found discrepancies");
        }
        Ok(discrepancies)
    }

    /// Paper-mode healing: overwrite local state with broker truth and
    /// journal one AUTO_HEAL_APPLIED event per discrepancy. Returns the
    /// number of heals applied.
    pub fn auto_heal(&self, discrepancies: &[Discrepancy], journal: &JournalWriter) -> usize {
        let mut healed = 0;

        for d in discrepancies {
            let action = match d.kind {
                DiscrepancyKind::QuantityMismatch | DiscrepancyKind::MissingLocal => {
                    let (Some(qty), Some(price)) = (d.broker_qty, d.broker_avg_price) else {
                        continue;
                    };
                    let result = self.positions.replace(Position {
                        symbol: d.symbol.clone(),
                        qty,
                        entry_price: price,
                        entry_time: self.clock.now_utc(),
                        strategy: "reconciled".to_string(),
                        order_id: "reconciled".to_string(),
                        stop_loss: None,
                        take_profit: None,
                    });
                    if let Err(e) = result {
                        warn!(symbol = %d.symbol, error = %e, "auto-heal replace failed");
                        continue;
                    }
                    "replace_local_with_broker"
                }
                DiscrepancyKind::PhantomLocal => {
                    if let Err(e) = self.positions.delete(&d.symbol) {
                        warn!(symbol = %d.symbol, error = %e, "auto-heal delete failed");
                        continue;
                    }
                    "delete_local"
                }
            };

            journal.write_event(json!({
                "event": "AUTO_HEAL_APPLIED",
                "discrepancy_type": d.kind.to_string(),
                "symbol": d.symbol,
                "local_value": d.local_qty.map(|q| q.to_string()),
                "broker_value": d.broker_qty.map(|q| q.to_string()),
                "action": action,
                "resolution": "paper_auto_heal",
            }));
            healed += 1;
        }

        if healed > 0 {
            warn!(healed, "paper auto-heal applied");
        }
        healed
    }
}

/// Read the paper auto-heal opt-in from the environment.
pub fn auto_heal_enabled() -> bool {
    matches!(
        std::env::var(PAPER_AUTO_HEAL_ENV).ok().as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::BrokerPosition;
    use crate::clock::SystemClock;
    use crate::testing::MockBroker;
    use rust_decimal_macros::dec;

    fn rig() -> (Reconciler, Arc<MockBroker>, Arc<PositionStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MockBroker::new());
        let positions = Arc::new(PositionStore::open(dir.path().join("p.json")).unwrap());
        let reconciler = Reconciler::new(broker.clone(), positions.clone(), Arc::new(SystemClock));
        (reconciler, broker, positions, dir)
    }

    fn local(symbol: &str, qty: Decimal) -> Position {
        Position {
            symbol: symbol.into(),
            qty,
            entry_price: dec!(100),
            entry_time: chrono::Utc::now(),
            strategy: "s".into(),
            order_id: "o".into(),
            stop_loss: None,
            take_profit: None,
        }
    }

    #[tokio::test]
    async fn clean_state_has_no_discrepancies() {
        let (reconciler, broker, positions, _dir) = rig();
        positions.replace(local("SPY", dec!(2))).unwrap();
        broker.set_positions(vec![BrokerPosition {
            symbol: "SPY".into(),
            qty: dec!(2),
            avg_entry_price: dec!(100),
        }]);

        assert!(reconciler.reconcile_startup().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn detects_all_three_discrepancy_kinds() {
        let (reconciler, broker, positions, _dir) = rig();
        positions.replace(local("SPY", dec!(2))).unwrap(); // mismatch
        positions.replace(local("GME", dec!(5))).unwrap(); // phantom
        broker.set_positions(vec![
            BrokerPosition { symbol: "SPY".into(), qty: dec!(3), avg_entry_price: dec!(100) },
            BrokerPosition { symbol: "QQQ".into(), qty: dec!(1), avg_entry_price: dec!(400) }, // missing local
        ]);

        let discrepancies = reconciler.reconcile_startup().await.unwrap();
        assert_eq!(discrepancies.len(), 3);

        let kinds: Vec<String> = discrepancies.iter().map(|d| d.kind.to_string()).collect();
        assert!(kinds.contains(&"position_qty_mismatch".to_string()));
        assert!(kinds.contains(&"missing_local_position".to_string()));
        assert!(kinds.contains(&"phantom_local_position".to_string()));
    }

    #[tokio::test]
    async fn auto_heal_applies_broker_truth_and_journals() {
        let (reconciler, broker, positions, dir) = rig();
        positions.replace(local("SPY", dec!(2))).unwrap();
        positions.replace(local("GME", dec!(5))).unwrap();
        broker.set_positions(vec![BrokerPosition {
            symbol: "SPY".into(),
            qty: dec!(3),
            avg_entry_price: dec!(101),
        }]);

        let journal = JournalWriter::with_run_id(dir.path().join("journal"), "run-1".into()).unwrap();
        let discrepancies = reconciler.reconcile_startup().await.unwrap();
        let healed = reconciler.auto_heal(&discrepancies, &journal);

        assert_eq!(healed, 2);
        assert_eq!(positions.get("SPY").unwrap().qty, dec!(3));
        assert_eq!(positions.get("SPY").unwrap().entry_price, dec!(101));
        assert!(positions.get("GME").is_none());

        let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let content = std::fs::read_to_string(
            dir.path().join("journal/daily").join(format!("{date}.jsonl")),
        )
        .unwrap();
        let events: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e["event"] == "AUTO_HEAL_APPLIED"
            && e["resolution"] == "paper_auto_heal"
            && e["run_id"] == "run-1"));
    }
}
