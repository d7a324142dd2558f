// =============================================================================
// Protection manager — ordered pre-trade veto stack
// =============================================================================
//
// Protections are pluggable and evaluated strictly in registration order;
// the FIRST protection that reports a block wins and its reason is the one
// journaled. Protections keep their own per-symbol state, fed by the
// manager's market-data / trade-result / equity fan-outs.
// =============================================================================

pub mod cooldown_period;
pub mod drawdown;
pub mod stoploss_guard;
pub mod time_window;
pub mod volatility;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::clock::Clock;

pub use cooldown_period::CooldownPeriod;
pub use drawdown::DrawdownProtection;
pub use stoploss_guard::StoplossGuard;
pub use time_window::TimeWindowProtection;
pub use volatility::VolatilityHalt;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Inputs available to every protection check.
#[derive(Debug, Clone)]
pub struct ProtectionContext {
    pub symbol: String,
    pub now: DateTime<Utc>,
}

/// Outcome of one protection check.
#[derive(Debug, Clone)]
pub struct ProtectionResult {
    pub is_protected: bool,
    pub reason: Option<String>,
    pub until: Option<DateTime<Utc>>,
}

impl ProtectionResult {
    pub fn clear() -> Self {
        Self {
            is_protected: false,
            reason: None,
            until: None,
        }
    }

    pub fn blocked(reason: impl Into<String>, until: Option<DateTime<Utc>>) -> Self {
        Self {
            is_protected: true,
            reason: Some(reason.into()),
            until,
        }
    }
}

/// One pluggable pre-trade protection.
pub trait Protection: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, ctx: &ProtectionContext) -> ProtectionResult;

    /// Latest traded price for a symbol (volatility tracking).
    fn update_market_data(&self, _symbol: &str, _price: Decimal) {}

    /// Realized PnL of a completed round trip.
    fn record_trade_result(&self, _symbol: &str, _pnl: Decimal, _ts: DateTime<Utc>) {}

    /// Current account equity (drawdown tracking).
    fn update_equity(&self, _equity: Decimal, _ts: DateTime<Utc>) {}
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Holds the configured protections in evaluation order.
pub struct ProtectionManager {
    protections: Vec<Box<dyn Protection>>,
    clock: Arc<dyn Clock>,
}

impl ProtectionManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            protections: Vec::new(),
            clock,
        }
    }

    /// Append a protection. Evaluation order == registration order.
    pub fn register(&mut self, protection: Box<dyn Protection>) {
        self.protections.push(protection);
    }

    pub fn count(&self) -> usize {
        self.protections.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.protections.iter().map(|p| p.name()).collect()
    }

    /// Evaluate all protections for `symbol`; first blocker wins.
    pub fn check(&self, symbol: &str) -> ProtectionResult {
        let ctx = ProtectionContext {
            symbol: symbol.to_uppercase(),
            now: self.clock.now_utc(),
        };

        for protection in &self.protections {
            let result = protection.check(&ctx);
            if result.is_protected {
                warn!(
                    symbol = %ctx.symbol,
                    protection = protection.name(),
                    reason = ?result.reason,
                    until = ?result.until,
                    "protection blocked signal"
                );
                return result;
            }
        }
        ProtectionResult::clear()
    }

    pub fn update_market_data(&self, symbol: &str, price: Decimal) {
        for protection in &self.protections {
            protection.update_market_data(symbol, price);
        }
    }

    pub fn record_trade_result(&self, symbol: &str, pnl: Decimal) {
        let now = self.clock.now_utc();
        for protection in &self.protections {
            protection.record_trade_result(symbol, pnl, now);
        }
    }

    pub fn update_equity(&self, equity: Decimal) {
        let now = self.clock.now_utc();
        for protection in &self.protections {
            protection.update_equity(equity, now);
        }
    }
}
