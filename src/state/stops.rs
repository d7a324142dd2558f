// =============================================================================
// Protective-stop lifecycle — authoritative symbol → stop-order map
// =============================================================================
//
// Exactly one source of truth for which protective stops are live. Every
// mutation is idempotent and returns a journal-ready lifecycle event; the
// map can be reconstructed either by replaying those events or from the
// broker's open orders on restart.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::info;

use crate::broker::types::BrokerOrder;
use crate::types::{OrderSide, OrderType};

// ---------------------------------------------------------------------------
// Lifecycle events
// ---------------------------------------------------------------------------

/// Journal-ready record of one protective-stop lifecycle transition.
#[derive(Debug, Clone)]
pub struct StopLifecycleEvent {
    pub event: &'static str,
    pub symbol: String,
    pub stop_order_id: Option<String>,
    pub entry_order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

impl StopLifecycleEvent {
    pub fn to_value(&self) -> Value {
        let mut v = json!({
            "event": self.event,
            "symbol": self.symbol,
            "stop_order_id": self.stop_order_id,
            "entry_order_id": self.entry_order_id,
            "timestamp": self.timestamp.to_rfc3339(),
        });
        if let (Some(obj), Some(extra)) = (v.as_object_mut(), self.details.as_object()) {
            for (k, val) in extra {
                obj.insert(k.clone(), val.clone());
            }
        }
        v
    }
}

#[derive(Debug, Clone)]
struct StopInfo {
    stop_order_id: String,
    entry_order_id: Option<String>,
    stop_price: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Tracks active protective stops per symbol.
pub struct StopLifecycleManager {
    stops: Mutex<HashMap<String, StopInfo>>,
}

impl StopLifecycleManager {
    pub fn new() -> Self {
        Self {
            stops: Mutex::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn stop_id(&self, symbol: &str) -> Option<String> {
        self.stops
            .lock()
            .get(&symbol.to_uppercase())
            .map(|i| i.stop_order_id.clone())
    }

    pub fn has_stop(&self, symbol: &str) -> bool {
        self.stops.lock().contains_key(&symbol.to_uppercase())
    }

    pub fn stop_price(&self, symbol: &str) -> Option<Decimal> {
        self.stops
            .lock()
            .get(&symbol.to_uppercase())
            .and_then(|i| i.stop_price)
    }

    /// Snapshot {symbol: stop_order_id} of all active stops.
    pub fn active_stops(&self) -> HashMap<String, String> {
        self.stops
            .lock()
            .iter()
            .map(|(sym, info)| (sym.clone(), info.stop_order_id.clone()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.stops.lock().len()
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Record a placed protective stop. Idempotent: an existing stop for the
    /// symbol is never overwritten; the attempt is reported instead.
    pub fn place(
        &self,
        symbol: &str,
        stop_order_id: &str,
        entry_order_id: Option<&str>,
        stop_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> StopLifecycleEvent {
        let key = symbol.to_uppercase();
        let mut stops = self.stops.lock();

        if let Some(existing) = stops.get(&key) {
            return StopLifecycleEvent {
                event: "protective_stop_already_exists",
                symbol: key,
                stop_order_id: Some(existing.stop_order_id.clone()),
                entry_order_id: entry_order_id.map(String::from),
                timestamp: now,
                details: json!({ "attempted_stop_id": stop_order_id }),
            };
        }

        stops.insert(
            key.clone(),
            StopInfo {
                stop_order_id: stop_order_id.to_string(),
                entry_order_id: entry_order_id.map(String::from),
                stop_price,
            },
        );

        info!(symbol = %key, stop_order_id, "protective stop placed");
        StopLifecycleEvent {
            event: "protective_stop_placed",
            symbol: key,
            stop_order_id: Some(stop_order_id.to_string()),
            entry_order_id: entry_order_id.map(String::from),
            timestamp: now,
            details: match stop_price {
                Some(p) => json!({ "stop_price": p.to_string() }),
                None => json!({}),
            },
        }
    }

    /// Record a cancelled protective stop. Idempotent: a missing stop
    /// produces a not-found event, never an error.
    pub fn cancel(&self, symbol: &str, reason: &str, now: DateTime<Utc>) -> StopLifecycleEvent {
        let key = symbol.to_uppercase();
        let removed = self.stops.lock().remove(&key);

        match removed {
            Some(info) => {
                info!(symbol = %key, stop_order_id = %info.stop_order_id, reason, "protective stop cancelled");
                StopLifecycleEvent {
                    event: "protective_stop_cancelled",
                    symbol: key,
                    stop_order_id: Some(info.stop_order_id),
                    entry_order_id: info.entry_order_id,
                    timestamp: now,
                    details: json!({ "reason": reason }),
                }
            }
            None => StopLifecycleEvent {
                event: "protective_stop_not_found",
                symbol: key,
                stop_order_id: None,
                entry_order_id: None,
                timestamp: now,
                details: json!({ "reason": reason }),
            },
        }
    }

    // -------------------------------------------------------------------------
    // Recovery
    // -------------------------------------------------------------------------

    /// Replay lifecycle events; the final per-symbol state decides which
    /// stops are active. Returns the number of stops restored.
    pub fn restore_from_events(&self, events: &[Value], now: DateTime<Utc>) -> Vec<StopLifecycleEvent> {
        let mut final_state: HashMap<String, Option<StopInfo>> = HashMap::new();

        for ev in events {
            let kind = ev["event"].as_str().unwrap_or("");
            let symbol = match ev["symbol"].as_str() {
                Some(s) if !s.is_empty() => s.to_uppercase(),
                _ => continue,
            };

            match kind {
                "protective_stop_placed" => {
                    let stop_id = ev["stop_order_id"].as_str().unwrap_or("").to_string();
                    final_state.insert(
                        symbol,
                        Some(StopInfo {
                            stop_order_id: stop_id,
                            entry_order_id: ev["entry_order_id"].as_str().map(String::from),
                            stop_price: ev["stop_price"]
                                .as_str()
                                .and_then(|s| s.parse::<Decimal>().ok()),
                        }),
                    );
                }
                "protective_stop_cancelled" | "protective_stop_filled" => {
                    final_state.insert(symbol, None);
                }
                _ => {}
            }
        }

        let mut restored = Vec::new();
        let mut stops = self.stops.lock();
        for (symbol, info) in final_state {
            if let Some(info) = info {
                if !stops.contains_key(&symbol) {
                    restored.push(StopLifecycleEvent {
                        event: "protective_stop_restored",
                        symbol: symbol.clone(),
                        stop_order_id: Some(info.stop_order_id.clone()),
                        entry_order_id: info.entry_order_id.clone(),
                        timestamp: now,
                        details: json!({}),
                    });
                    stops.insert(symbol, info);
                }
            }
        }
        restored
    }

    /// Rebuild the map from the broker's open orders: every open SELL STOP
    /// with both a symbol and an id counts; anything else is skipped.
    pub fn reload_from_broker(&self, open_orders: &[BrokerOrder]) -> usize {
        let mut stops = self.stops.lock();
        let mut loaded = 0;

        for order in open_orders {
            if order.side != OrderSide::Sell || order.order_type != OrderType::Stop {
                continue;
            }
            if order.symbol.is_empty() || order.id.is_empty() {
                continue;
            }
            stops.insert(
                order.symbol.to_uppercase(),
                StopInfo {
                    stop_order_id: order.id.clone(),
                    entry_order_id: order.client_order_id.clone(),
                    stop_price: order.stop_price,
                },
            );
            loaded += 1;
        }

        if loaded > 0 {
            info!(count = loaded, "protective stops reloaded from broker");
        }
        loaded
    }
}

impl Default for StopLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 9, 15, 0, 0).unwrap()
    }

    #[test]
    fn place_then_cancel_clears_stop() {
        let mgr = StopLifecycleManager::new();

        let ev = mgr.place("spy", "brk-stop-1", Some("ord-1"), Some(dec!(99.50)), now());
        assert_eq!(ev.event, "protective_stop_placed");
        assert!(mgr.has_stop("SPY"));
        assert_eq!(mgr.stop_id("SPY").as_deref(), Some("brk-stop-1"));

        let ev = mgr.cancel("SPY", "exit_signal", now());
        assert_eq!(ev.event, "protective_stop_cancelled");
        assert!(!mgr.has_stop("SPY"));
    }

    #[test]
    fn duplicate_place_is_idempotent() {
        let mgr = StopLifecycleManager::new();
        mgr.place("SPY", "brk-stop-1", None, None, now());

        let ev = mgr.place("SPY", "brk-stop-2", None, None, now());
        assert_eq!(ev.event, "protective_stop_already_exists");
        // Original mapping is preserved.
        assert_eq!(mgr.stop_id("SPY").as_deref(), Some("brk-stop-1"));
        assert_eq!(mgr.count(), 1);
    }

    #[test]
    fn duplicate_cancel_is_idempotent() {
        let mgr = StopLifecycleManager::new();
        mgr.place("SPY", "brk-stop-1", None, None, now());
        mgr.cancel("SPY", "exit_signal", now());

        let ev = mgr.cancel("SPY", "exit_signal", now());
        assert_eq!(ev.event, "protective_stop_not_found");
        assert!(!mgr.has_stop("SPY"));
    }

    #[test]
    fn replay_rebuilds_exactly_end_of_log_state() {
        let mgr = StopLifecycleManager::new();
        let events = vec![
            json!({ "event": "protective_stop_placed", "symbol": "SPY", "stop_order_id": "s-1" }),
            json!({ "event": "protective_stop_placed", "symbol": "QQQ", "stop_order_id": "s-2" }),
            json!({ "event": "protective_stop_cancelled", "symbol": "SPY", "stop_order_id": "s-1" }),
            json!({ "event": "protective_stop_placed", "symbol": "SPY", "stop_order_id": "s-3" }),
            json!({ "event": "protective_stop_filled", "symbol": "QQQ", "stop_order_id": "s-2" }),
        ];

        let restored = mgr.restore_from_events(&events, now());
        assert_eq!(restored.len(), 1);
        assert_eq!(mgr.active_stops(), HashMap::from([("SPY".to_string(), "s-3".to_string())]));
    }

    #[test]
    fn broker_reload_takes_only_sell_stops() {
        let mgr = StopLifecycleManager::new();
        let orders = vec![
            BrokerOrder {
                id: "brk-1".into(),
                client_order_id: Some("ord-1".into()),
                symbol: "spy".into(),
                side: OrderSide::Sell,
                order_type: OrderType::Stop,
                qty: dec!(1),
                limit_price: None,
                stop_price: Some(dec!(99.50)),
                status: crate::broker::types::BrokerOrderStatus::Accepted,
                filled_qty: dec!(0),
                filled_avg_price: None,
            },
            BrokerOrder {
                id: "brk-2".into(),
                client_order_id: None,
                symbol: "QQQ".into(),
                side: OrderSide::Buy,
                order_type: OrderType::Limit,
                qty: dec!(1),
                limit_price: Some(dec!(400)),
                stop_price: None,
                status: crate::broker::types::BrokerOrderStatus::Accepted,
                filled_qty: dec!(0),
                filled_avg_price: None,
            },
        ];

        assert_eq!(mgr.reload_from_broker(&orders), 1);
        assert_eq!(mgr.stop_id("SPY").as_deref(), Some("brk-1"));
        assert!(!mgr.has_stop("QQQ"));
    }
}
