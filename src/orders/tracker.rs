// =============================================================================
// Order tracker — lifecycle metadata, fill aggregation, drift detection
// =============================================================================
//
// Keeps two maps keyed by internal order id (in-flight and completed) plus a
// broker-id index. Every mutation acquires the internal lock; read-only
// queries return snapshots.
//
// Drift definitions against a broker open-orders snapshot:
//   orphan = broker has an order id we never tracked (missed fill or a
//            manually placed order)
//   shadow = we believe an order is open that the broker does not list
//            (a submit that never landed)
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::orders::machine::OrderState;
use crate::types::{OrderSide, OrderType};

// ---------------------------------------------------------------------------
// Fill and order records
// ---------------------------------------------------------------------------

/// One incremental fill applied to an order.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub timestamp: DateTime<Utc>,
    /// Incremental quantity (NOT the broker's cumulative figure).
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
}

impl FillEvent {
    pub fn new(timestamp: DateTime<Utc>, quantity: Decimal, price: Decimal) -> Self {
        Self {
            timestamp,
            quantity,
            price,
            commission: Decimal::ZERO,
        }
    }

    pub fn gross_amount(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Complete lifecycle record for one order, creation through completion.
#[derive(Debug, Clone)]
pub struct InFlightOrder {
    // Identity
    pub internal_order_id: String,
    pub broker_order_id: Option<String>,

    // Order details
    pub symbol: String,
    pub quantity: Decimal,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub strategy: String,

    // Lifecycle timestamps
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub first_fill_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_update_at: DateTime<Utc>,

    // Fill tracking
    pub filled_quantity: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub fills: Vec<FillEvent>,
    pub total_commission: Decimal,

    // State
    pub current_state: OrderState,
}

impl InFlightOrder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        internal_order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
        strategy: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            internal_order_id: internal_order_id.into(),
            broker_order_id: None,
            symbol: symbol.into().to_uppercase(),
            quantity,
            side,
            order_type,
            limit_price,
            stop_price,
            strategy: strategy.into(),
            created_at: now,
            submitted_at: None,
            first_fill_at: None,
            completed_at: None,
            last_update_at: now,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            fills: Vec::new(),
            total_commission: Decimal::ZERO,
            current_state: OrderState::Pending,
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_partially_filled(&self) -> bool {
        self.filled_quantity > Decimal::ZERO && self.filled_quantity < self.quantity
    }

    fn add_fill(&mut self, fill: FillEvent) {
        if self.first_fill_at.is_none() {
            self.first_fill_at = Some(fill.timestamp);
        }

        self.filled_quantity += fill.quantity;
        self.total_commission += fill.commission;
        self.last_update_at = fill.timestamp;
        self.fills.push(fill);

        // Weighted average over all fills seen so far.
        let total_value: Decimal = self.fills.iter().map(FillEvent::gross_amount).sum();
        let total_qty: Decimal = self.fills.iter().map(|f| f.quantity).sum();
        if total_qty > Decimal::ZERO {
            self.average_fill_price = Some(total_value / total_qty);
        }
    }
}

/// Status update applied through the tracker.
#[derive(Debug, Clone, Default)]
pub struct OrderUpdate {
    pub broker_order_id: Option<String>,
    pub status: Option<OrderState>,
    pub submitted_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

struct Inner {
    in_flight: HashMap<String, InFlightOrder>,
    completed: HashMap<String, InFlightOrder>,
    broker_to_internal: HashMap<String, String>,
}

/// Thread-safe order lifecycle tracker.
pub struct OrderTracker {
    inner: Mutex<Inner>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                in_flight: HashMap::new(),
                completed: HashMap::new(),
                broker_to_internal: HashMap::new(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Begin tracking an order.
    pub fn start_tracking(&self, order: InFlightOrder) {
        let mut inner = self.inner.lock();
        if let Some(broker_id) = &order.broker_order_id {
            inner
                .broker_to_internal
                .insert(broker_id.clone(), order.internal_order_id.clone());
        }
        info!(
            internal_order_id = %order.internal_order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            "started tracking order"
        );
        inner.in_flight.insert(order.internal_order_id.clone(), order);
    }

    /// Apply a status update; terminal statuses move the order to completed.
    pub fn process_order_update(&self, internal_order_id: &str, update: OrderUpdate, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();

        let order = match inner.in_flight.get_mut(internal_order_id) {
            Some(o) => o,
            None => {
                warn!(internal_order_id, "update for unknown order ignored");
                return;
            }
        };

        if let Some(broker_id) = &update.broker_order_id {
            if !broker_id.is_empty() {
                order.broker_order_id = Some(broker_id.clone());
            }
        }

        let mut terminal = None;
        if let Some(status) = update.status {
            if order.current_state != status {
                info!(
                    internal_order_id,
                    from = %order.current_state,
                    to = %status,
                    "tracked order status changed"
                );
            }
            order.current_state = status;
            if status == OrderState::Submitted && order.submitted_at.is_none() {
                order.submitted_at = Some(update.submitted_at.unwrap_or(now));
            }
            if status.is_terminal() {
                terminal = Some(status);
            }
        }
        order.last_update_at = now;

        // Re-index broker id after potential assignment.
        if let Some(broker_id) = inner
            .in_flight
            .get(internal_order_id)
            .and_then(|o| o.broker_order_id.clone())
        {
            inner
                .broker_to_internal
                .insert(broker_id, internal_order_id.to_string());
        }

        drop(inner);
        if terminal.is_some() {
            self.stop_tracking(internal_order_id, now);
        }
    }

    /// Apply one incremental fill.
    pub fn process_fill(&self, internal_order_id: &str, fill: FillEvent) {
        let mut inner = self.inner.lock();
        let order = match inner.in_flight.get_mut(internal_order_id) {
            Some(o) => o,
            None => {
                warn!(internal_order_id, "fill for unknown order ignored");
                return;
            }
        };

        order.add_fill(fill);
        info!(
            internal_order_id,
            filled = %order.filled_quantity,
            total = %order.quantity,
            avg_price = ?order.average_fill_price,
            "fill processed"
        );
    }

    /// Move an order to the completed map and drop the broker index entry.
    pub fn stop_tracking(&self, internal_order_id: &str, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let mut order = match inner.in_flight.remove(internal_order_id) {
            Some(o) => o,
            None => {
                warn!(internal_order_id, "stop_tracking for unknown order ignored");
                return;
            }
        };

        order.completed_at = Some(now);
        order.last_update_at = now;

        if let Some(broker_id) = &order.broker_order_id {
            inner.broker_to_internal.remove(broker_id);
        }

        info!(
            internal_order_id,
            state = %order.current_state,
            filled = %order.filled_quantity,
            "stopped tracking order"
        );
        inner.completed.insert(internal_order_id.to_string(), order);
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn in_flight(&self, internal_order_id: &str) -> Option<InFlightOrder> {
        self.inner.lock().in_flight.get(internal_order_id).cloned()
    }

    pub fn completed(&self, internal_order_id: &str) -> Option<InFlightOrder> {
        self.inner.lock().completed.get(internal_order_id).cloned()
    }

    pub fn all_in_flight(&self) -> Vec<InFlightOrder> {
        self.inner.lock().in_flight.values().cloned().collect()
    }

    /// In-flight orders for one symbol (open-order existence checks).
    pub fn open_orders_for_symbol(&self, symbol: &str) -> Vec<InFlightOrder> {
        let symbol = symbol.to_uppercase();
        self.inner
            .lock()
            .in_flight
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Total buying power reserved by in-flight BUY LIMIT orders
    /// (Σ requested qty × limit price).
    pub fn reserved_buying_power(&self) -> Decimal {
        self.inner
            .lock()
            .in_flight
            .values()
            .filter(|o| o.side == OrderSide::Buy && o.order_type == OrderType::Limit)
            .filter_map(|o| o.limit_price.map(|p| o.quantity * p))
            .sum()
    }

    // -------------------------------------------------------------------------
    // Drift detection
    // -------------------------------------------------------------------------

    /// Broker order ids we have no record of.
    pub fn orphaned_orders(&self, broker_open_ids: &[String]) -> Vec<String> {
        let inner = self.inner.lock();
        let orphans: Vec<String> = broker_open_ids
            .iter()
            .filter(|id| !inner.broker_to_internal.contains_key(*id))
            .cloned()
            .collect();
        if !orphans.is_empty() {
            warn!(count = orphans.len(), ids = ?orphans, "orphaned broker orders detected");
        }
        orphans
    }

    /// Internal ids of in-flight orders the broker no longer lists.
    pub fn shadow_orders(&self, broker_open_ids: &[String]) -> Vec<String> {
        let inner = self.inner.lock();
        let shadows: Vec<String> = inner
            .broker_to_internal
            .iter()
            .filter(|(broker_id, _)| !broker_open_ids.contains(broker_id))
            .map(|(_, internal_id)| internal_id.clone())
            .collect();
        if !shadows.is_empty() {
            error!(count = shadows.len(), ids = ?shadows, "shadow orders detected");
        }
        shadows
    }
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new()
    }
}
