// =============================================================================
// Order state machine — guarded transitions with durable state-change events
// =============================================================================
//
// The machine never calls the broker. It reacts to information the execution
// engine observed, enforces the legal edge set, and emits one state_change
// record per accepted transition (transaction log + event bus).
//
// Legal edges:
//
//   PENDING -> VALIDATED -> SUBMITTED -> ACCEPTED -> PARTIALLY_FILLED -> FILLED
//                                                 \-> FILLED
//   SUBMITTED -> REJECTED
//   ACCEPTED -> CANCELLED | EXPIRED
//   PARTIALLY_FILLED -> CANCELLED
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::clock::Clock;
use crate::events::EventBus;
use crate::state::transaction_log::TransactionLog;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Pending,
    Validated,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired)
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Validated => "VALIDATED",
            Self::Submitted => "SUBMITTED",
            Self::Accepted => "ACCEPTED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

/// The complete legal edge set.
pub const VALID_TRANSITIONS: &[(OrderState, OrderState)] = &[
    (OrderState::Pending, OrderState::Validated),
    (OrderState::Validated, OrderState::Submitted),
    (OrderState::Submitted, OrderState::Accepted),
    (OrderState::Submitted, OrderState::Rejected),
    (OrderState::Accepted, OrderState::PartiallyFilled),
    (OrderState::Accepted, OrderState::Filled),
    (OrderState::Accepted, OrderState::Cancelled),
    (OrderState::Accepted, OrderState::Expired),
    (OrderState::PartiallyFilled, OrderState::Filled),
    (OrderState::PartiallyFilled, OrderState::Cancelled),
];

fn edge_allowed(from: OrderState, to: OrderState) -> bool {
    VALID_TRANSITIONS.contains(&(from, to))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderStateError {
    #[error("order {order_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderState,
        to: OrderState,
    },

    #[error("order {order_id}: state {state} is terminal, no further transitions")]
    TerminalState { order_id: String, state: OrderState },

    #[error("order {order_id}: transition to SUBMITTED requires a broker order id")]
    BrokerConfirmationRequired { order_id: String },

    #[error("order {order_id}: unknown to the state machine")]
    UnknownOrder { order_id: String },
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// Per-order state with side-effecting transitions.
pub struct OrderStateMachine {
    states: Mutex<HashMap<String, OrderState>>,
    txlog: Arc<TransactionLog>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl OrderStateMachine {
    pub fn new(txlog: Arc<TransactionLog>, bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            txlog,
            bus,
            clock,
        }
    }

    /// Register a new order in `PENDING`. Idempotent for an existing id in
    /// `PENDING`; anything else is a programmer error surfaced as an
    /// invalid transition.
    pub fn create(&self, order_id: &str) -> Result<(), OrderStateError> {
        let mut states = self.states.lock();
        match states.get(order_id) {
            None => {
                states.insert(order_id.to_string(), OrderState::Pending);
                Ok(())
            }
            Some(OrderState::Pending) => Ok(()),
            Some(state) => Err(OrderStateError::InvalidTransition {
                order_id: order_id.to_string(),
                from: *state,
                to: OrderState::Pending,
            }),
        }
    }

    pub fn state_of(&self, order_id: &str) -> Option<OrderState> {
        self.states.lock().get(order_id).copied()
    }

    /// Apply one transition, enforcing guards, and emit the state-change
    /// event on success.
    pub fn transition(
        &self,
        order_id: &str,
        to: OrderState,
        broker_order_id: Option<&str>,
    ) -> Result<(), OrderStateError> {
        let from = {
            let mut states = self.states.lock();
            let current = *states
                .get(order_id)
                .ok_or_else(|| OrderStateError::UnknownOrder {
                    order_id: order_id.to_string(),
                })?;

            if current.is_terminal() {
                return Err(OrderStateError::TerminalState {
                    order_id: order_id.to_string(),
                    state: current,
                });
            }

            if to == OrderState::Submitted && broker_order_id.map_or(true, |id| id.is_empty()) {
                return Err(OrderStateError::BrokerConfirmationRequired {
                    order_id: order_id.to_string(),
                });
            }

            if !edge_allowed(current, to) {
                return Err(OrderStateError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from: current,
                    to,
                });
            }

            states.insert(order_id.to_string(), to);
            current
        };

        let event = json!({
            "event": "state_change",
            "ts_utc": self.clock.now_utc().to_rfc3339(),
            "internal_order_id": order_id,
            "from": from.to_string(),
            "to": to.to_string(),
            "broker_order_id": broker_order_id,
        });

        if let Err(e) = self.txlog.append("state_change", event.clone()) {
            // The transition itself stands; a logging failure must not undo
            // in-memory truth, but it has to be loud.
            tracing::error!(order_id, error = %e, "failed to append state_change to transaction log");
        }
        self.bus.publish(&event);

        info!(order_id, from = %from, to = %to, "order state changed");
        Ok(())
    }

    /// Walk the machine through intermediate edges until `target` is
    /// reached. Broker status polling can skip states (e.g. a market order
    /// observed directly as `filled`); this inserts the mandatory
    /// intermediate transitions.
    pub fn advance_to(
        &self,
        order_id: &str,
        target: OrderState,
        broker_order_id: Option<&str>,
    ) -> Result<(), OrderStateError> {
        loop {
            let current = self
                .state_of(order_id)
                .ok_or_else(|| OrderStateError::UnknownOrder {
                    order_id: order_id.to_string(),
                })?;

            if current == target {
                return Ok(());
            }

            let next = if edge_allowed(current, target) {
                target
            } else {
                match current {
                    OrderState::Pending => OrderState::Validated,
                    OrderState::Validated => OrderState::Submitted,
                    OrderState::Submitted => OrderState::Accepted,
                    _ => target, // let transition() produce the precise error
                }
            };

            self.transition(order_id, next, broker_order_id)?;
        }
    }
}
