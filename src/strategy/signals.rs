// =============================================================================
// Typed strategy signals
// =============================================================================
//
// A signal is an intent to trade, not an order. Quantities are decimal to
// support fractional shares; stop_loss / take_profit are prices, not
// percentages; `reason` is required for auditability.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{OrderSide, OrderType};

/// Strategy output: the intent to trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Time-to-live for LIMIT entries ("one attempt only").
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    pub reason: String,
    pub strategy: String,
}

impl Signal {
    /// Shorthand for a MARKET intent.
    pub fn market(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        reason: impl Into<String>,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            side,
            quantity,
            order_type: OrderType::Market,
            entry_price: None,
            limit_price: None,
            ttl_seconds: None,
            stop_loss: None,
            take_profit: None,
            reason: reason.into(),
            strategy: strategy.into(),
        }
    }

    /// Exit signals bypass the single-trade entry guard.
    pub fn is_exit(&self) -> bool {
        self.side == OrderSide::Sell
    }

    /// Structural validity check backing purity enforcement.
    pub fn well_formed(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("missing symbol".into());
        }
        if self.reason.trim().is_empty() {
            return Err("missing reason".into());
        }
        if self.order_type == OrderType::Limit && self.limit_price.is_none() {
            return Err("LIMIT signal without limit_price".into());
        }
        Ok(())
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}
