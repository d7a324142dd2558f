// =============================================================================
// Stoploss guard — halt after a run of losing trades
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::protections::{Protection, ProtectionContext, ProtectionResult};

/// Blocks all entries once `max_consecutive_losses` losing trades have been
/// recorded with no intervening winner inside the lookback window.
pub struct StoplossGuard {
    max_consecutive_losses: u32,
    lookback: Duration,
    trades: Mutex<VecDeque<(DateTime<Utc>, Decimal)>>,
}

impl StoplossGuard {
    pub fn new(max_consecutive_losses: u32, lookback_minutes: i64) -> Self {
        Self {
            max_consecutive_losses: max_consecutive_losses.max(1),
            lookback: Duration::minutes(lookback_minutes),
            trades: Mutex::new(VecDeque::new()),
        }
    }

    fn trailing_losses(&self, now: DateTime<Utc>) -> u32 {
        let trades = self.trades.lock();
        let mut count = 0;
        for (ts, pnl) in trades.iter().rev() {
            if now - *ts > self.lookback {
                break;
            }
            if *pnl < Decimal::ZERO {
                count += 1;
            } else {
                break;
            }
        }
        count
    }
}

impl Protection for StoplossGuard {
    fn name(&self) -> &'static str {
        "stoploss_guard"
    }

    fn check(&self, ctx: &ProtectionContext) -> ProtectionResult {
        let losses = self.trailing_losses(ctx.now);
        if losses >= self.max_consecutive_losses {
            ProtectionResult::blocked(
                format!(
                    "stoploss_guard:{losses}_consecutive_losses (limit {})",
                    self.max_consecutive_losses
                ),
                None,
            )
        } else {
            ProtectionResult::clear()
        }
    }

    fn record_trade_result(&self, _symbol: &str, pnl: Decimal, ts: DateTime<Utc>) {
        let mut trades = self.trades.lock();
        trades.push_back((ts, pnl));
        // Drop entries far outside any possible lookback.
        while let Some((oldest, _)) = trades.front() {
            if ts - *oldest > self.lookback * 2 {
                trades.pop_front();
            } else {
                break;
            }
        }
    }
}
