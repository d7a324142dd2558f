// =============================================================================
// Strategy contract — intent emission with purity enforcement
// =============================================================================
//
// CRITICAL CONTRACT:
//   1. Strategies receive validated bars and return INTENT, never orders.
//   2. Strategies never hold broker or execution-engine handles. What a
//      strategy holds is declared via `held_handles()` and checked against
//      the forbidden set before the first bar is ever delivered.
//   3. Every emitted signal must be well-formed (symbol, reason, and a
//      limit price when the order type demands one); a malformed signal is
//      a programmer error, not a market condition.
// =============================================================================

pub mod lifecycle;
pub mod registry;
pub mod signals;
pub mod vwap_micro;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::data::bar::{Bar, Timeframe};
pub use lifecycle::StrategyLifecycleManager;
pub use registry::{StrategyRegistry, StrategySpec};
pub use signals::Signal;

/// Handle names a strategy may never hold.
pub const FORBIDDEN_HANDLES: &[&str] = &[
    "broker",
    "_broker",
    "broker_connector",
    "_broker_connector",
    "execution_engine",
    "_execution_engine",
    "exec_engine",
    "_exec_engine",
];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Violation of the strategy purity contract. Programmer error: surfaced
/// immediately, never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyPurityError {
    #[error("strategy '{strategy}' holds forbidden handle '{handle}'; strategies emit intents only")]
    ForbiddenHandle { strategy: String, handle: String },

    #[error("strategy '{strategy}' emitted an invalid signal at index {index}: {reason}")]
    InvalidSignal {
        strategy: String,
        index: usize,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Output shape
// ---------------------------------------------------------------------------

/// What `on_bar` may return.
#[derive(Debug)]
pub enum SignalOutput {
    None,
    Single(Signal),
    Many(Vec<Signal>),
}

impl From<Option<Signal>> for SignalOutput {
    fn from(value: Option<Signal>) -> Self {
        match value {
            Some(s) => Self::Single(s),
            None => Self::None,
        }
    }
}

/// Validate and normalize an `on_bar` return value into a flat list.
pub fn validate_signal_output(
    output: SignalOutput,
    strategy_name: &str,
) -> Result<Vec<Signal>, StrategyPurityError> {
    let signals = match output {
        SignalOutput::None => Vec::new(),
        SignalOutput::Single(s) => vec![s],
        SignalOutput::Many(list) => list,
    };

    for (index, signal) in signals.iter().enumerate() {
        if let Err(reason) = signal.well_formed() {
            return Err(StrategyPurityError::InvalidSignal {
                strategy: strategy_name.to_string(),
                index,
                reason,
            });
        }
    }
    Ok(signals)
}

/// Check a strategy's declared handles against the forbidden set.
pub fn check_broker_access(strategy: &dyn Strategy) -> Result<(), StrategyPurityError> {
    for handle in strategy.held_handles() {
        if FORBIDDEN_HANDLES.contains(&handle) {
            return Err(StrategyPurityError::ForbiddenHandle {
                strategy: strategy.name().to_string(),
                handle: handle.to_string(),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A trading strategy. Implementations are pure intent generators: bars in,
/// signals out.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Symbols this strategy trades; bars for other symbols are not routed.
    fn symbols(&self) -> &[String];

    fn timeframe(&self) -> Timeframe {
        Timeframe::Min1
    }

    /// Bars needed before the strategy can emit signals.
    fn warmup_bars(&self) -> u32 {
        0
    }

    /// Names of external handles this strategy holds. The lifecycle manager
    /// rejects any intersection with [`FORBIDDEN_HANDLES`] at start time.
    fn held_handles(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Called once when the strategy starts.
    fn on_init(&mut self);

    /// Called for each new complete bar of a subscribed symbol.
    fn on_bar(&mut self, bar: &Bar) -> SignalOutput;

    /// Called when one of this strategy's orders fills.
    fn on_order_filled(
        &mut self,
        _order_id: &str,
        _symbol: &str,
        _filled_qty: Decimal,
        _fill_price: Decimal,
    ) -> Option<Signal> {
        None
    }

    /// Called when one of this strategy's orders is rejected.
    fn on_order_rejected(&mut self, _order_id: &str, _symbol: &str, _reason: &str) -> Option<Signal> {
        None
    }

    /// Called on shutdown.
    fn on_stop(&mut self);
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn signal() -> Signal {
        Signal {
            symbol: "SPY".into(),
            side: OrderSide::Buy,
            quantity: dec!(1),
            order_type: OrderType::Market,
            entry_price: None,
            limit_price: None,
            ttl_seconds: None,
            stop_loss: None,
            take_profit: None,
            reason: "TEST".into(),
            strategy: "unit".into(),
        }
    }

    #[test]
    fn none_normalizes_to_empty() {
        let out = validate_signal_output(SignalOutput::None, "unit").unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn single_and_many_normalize_to_lists() {
        let out = validate_signal_output(SignalOutput::Single(signal()), "unit").unwrap();
        assert_eq!(out.len(), 1);

        let out =
            validate_signal_output(SignalOutput::Many(vec![signal(), signal()]), "unit").unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn invalid_signal_carries_position_index() {
        let mut bad = signal();
        bad.reason = String::new();

        let err =
            validate_signal_output(SignalOutput::Many(vec![signal(), bad]), "unit").unwrap_err();
        match err {
            StrategyPurityError::InvalidSignal { index, strategy, .. } => {
                assert_eq!(index, 1);
                assert_eq!(strategy, "unit");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn limit_signal_without_price_is_invalid() {
        let mut bad = signal();
        bad.order_type = OrderType::Limit;

        let err = validate_signal_output(SignalOutput::Single(bad), "unit").unwrap_err();
        assert!(matches!(err, StrategyPurityError::InvalidSignal { index: 0, .. }));
    }
}
