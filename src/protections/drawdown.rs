// =============================================================================
// Drawdown protection — halt when intraday drawdown from peak exceeds limit
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::America::New_York;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::protections::{Protection, ProtectionContext, ProtectionResult};

#[derive(Debug, Clone)]
struct EquityState {
    session: NaiveDate,
    peak: Decimal,
    current: Decimal,
}

/// Blocks all entries once equity has fallen more than `max_drawdown_pct`
/// (fractional, e.g. 0.05 = 5 %) from the intraday peak. Peak tracking
/// resets on the New York session date.
pub struct DrawdownProtection {
    max_drawdown_pct: Decimal,
    state: Mutex<Option<EquityState>>,
}

impl DrawdownProtection {
    pub fn new(max_drawdown_pct: Decimal) -> Self {
        Self {
            max_drawdown_pct,
            state: Mutex::new(None),
        }
    }

    fn drawdown(&self) -> Option<Decimal> {
        let state = self.state.lock();
        let s = state.as_ref()?;
        if s.peak <= Decimal::ZERO {
            return None;
        }
        Some((s.peak - s.current) / s.peak)
    }
}

impl Protection for DrawdownProtection {
    fn name(&self) -> &'static str {
        "max_drawdown"
    }

    fn check(&self, _ctx: &ProtectionContext) -> ProtectionResult {
        match self.drawdown() {
            Some(dd) if dd > self.max_drawdown_pct => ProtectionResult::blocked(
                format!("max_drawdown:{dd}>limit={}", self.max_drawdown_pct),
                None,
            ),
            _ => ProtectionResult::clear(),
        }
    }

    fn update_equity(&self, equity: Decimal, ts: DateTime<Utc>) {
        if equity <= Decimal::ZERO {
            return;
        }
        let session = ts.with_timezone(&New_York).date_naive();
        let mut state = self.state.lock();

        match state.as_mut() {
            Some(s) if s.session == session => {
                s.current = equity;
                if equity > s.peak {
                    s.peak = equity;
                }
            }
            _ => {
                *state = Some(EquityState {
                    session,
                    peak: equity,
                    current: equity,
                });
            }
        }
    }
}
