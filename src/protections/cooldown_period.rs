// =============================================================================
// Cooldown period — fixed lockout per symbol after any realized loss
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::protections::{Protection, ProtectionContext, ProtectionResult};

/// After a losing round trip on a symbol, blocks new entries on that symbol
/// for a fixed duration.
pub struct CooldownPeriod {
    lockout: Duration,
    last_loss: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownPeriod {
    pub fn new(lockout_minutes: i64) -> Self {
        Self {
            lockout: Duration::minutes(lockout_minutes),
            last_loss: Mutex::new(HashMap::new()),
        }
    }
}

impl Protection for CooldownPeriod {
    fn name(&self) -> &'static str {
        "cooldown_period"
    }

    fn check(&self, ctx: &ProtectionContext) -> ProtectionResult {
        let last = self.last_loss.lock().get(&ctx.symbol).copied();
        match last {
            Some(loss_ts) => {
                let until = loss_ts + self.lockout;
                if ctx.now < until {
                    ProtectionResult::blocked(
                        format!("cooldown_period:loss_at={}", loss_ts.to_rfc3339()),
                        Some(until),
                    )
                } else {
                    ProtectionResult::clear()
                }
            }
            None => ProtectionResult::clear(),
        }
    }

    fn record_trade_result(&self, symbol: &str, pnl: Decimal, ts: DateTime<Utc>) {
        if pnl < Decimal::ZERO {
            self.last_loss.lock().insert(symbol.to_uppercase(), ts);
        }
    }
}
