// =============================================================================
// Broker wire types and error taxonomy
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{OrderSide, OrderType};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Broker call failure, split by retryability.
///
/// `Transient` failures (network, timeout, 5xx) may be retried under the
/// retry policy's absolute timeout. `Permanent` failures (rejections, 4xx,
/// unknown symbols) must never be retried.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transient broker error during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("broker rejected {operation} ({status}): {message}")]
    Permanent {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("failed to parse broker response for {operation}: {message}")]
    Parse { operation: String, message: String },
}

impl BrokerError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn permanent(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn parse(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether the retry policy is allowed to re-attempt this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Broker market-clock snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerClockInfo {
    pub is_open: bool,
    pub next_open: Option<DateTime<Utc>>,
    pub next_close: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Account snapshot as reported by the broker.
///
/// Numeric fields are kept as wire strings; the runtime safe-parses them to
/// decimals and degrades to zero on malformed values rather than crashing
/// the cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub portfolio_value: String,
    #[serde(default)]
    pub buying_power: String,
    #[serde(default)]
    pub equity: String,
    #[serde(default)]
    pub daytrade_count: u32,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Broker-side order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerOrderStatus {
    New,
    PendingNew,
    Accepted,
    Held,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

impl BrokerOrderStatus {
    /// Orders in these states occupy the book and must be cancelled during
    /// recovery.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            Self::New | Self::PendingNew | Self::Accepted | Self::Held | Self::PartiallyFilled
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Expired)
    }
}

impl std::fmt::Display for BrokerOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::PendingNew => "pending_new",
            Self::Accepted => "accepted",
            Self::Held => "held",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Broker view of one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    pub status: BrokerOrderStatus,
    /// Cumulative filled quantity as reported by the broker.
    #[serde(default)]
    pub filled_qty: Decimal,
    #[serde(default)]
    pub filled_avg_price: Option<Decimal>,
}

/// New-order request sent to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Caller-chosen idempotency key (our internal order ID).
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    pub time_in_force: String,
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Broker view of one held position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
}
