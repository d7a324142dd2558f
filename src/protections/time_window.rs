// =============================================================================
// Time-window protection — trade only inside the configured Eastern window
// =============================================================================

use chrono::NaiveTime;
use chrono_tz::America::New_York;

use crate::protections::{Protection, ProtectionContext, ProtectionResult};

/// Accepts signals only when the current Eastern time lies inside
/// `[trade_start, trade_end]` (both inclusive).
pub struct TimeWindowProtection {
    trade_start: NaiveTime,
    trade_end: NaiveTime,
}

impl TimeWindowProtection {
    pub fn new(trade_start: NaiveTime, trade_end: NaiveTime) -> Self {
        Self {
            trade_start,
            trade_end,
        }
    }

    /// Parse "HH:MM" strings, e.g. ("10:00", "11:30").
    pub fn from_strings(start: &str, end: &str) -> Option<Self> {
        let parse = |s: &str| NaiveTime::parse_from_str(s.trim(), "%H:%M").ok();
        Some(Self::new(parse(start)?, parse(end)?))
    }
}

impl Protection for TimeWindowProtection {
    fn name(&self) -> &'static str {
        "time_window"
    }

    fn check(&self, ctx: &ProtectionContext) -> ProtectionResult {
        let et = ctx.now.with_timezone(&New_York).time();
        if et >= self.trade_start && et <= self.trade_end {
            ProtectionResult::clear()
        } else {
            ProtectionResult::blocked(
                format!(
                    "outside_trade_window:{}-{} (now_et={})",
                    self.trade_start.format("%H:%M"),
                    self.trade_end.format("%H:%M"),
                    et.format("%H:%M:%S"),
                ),
                None,
            )
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ctx_at_utc(h: u32, m: u32) -> ProtectionContext {
        ProtectionContext {
            symbol: "SPY".into(),
            // February: New York is UTC-5.
            now: Utc.with_ymd_and_hms(2026, 2, 9, h, m, 0).unwrap(),
        }
    }

    fn window() -> TimeWindowProtection {
        TimeWindowProtection::from_strings("10:00", "11:30").unwrap()
    }

    #[test]
    fn inside_window_is_clear() {
        // 15:30 UTC == 10:30 ET.
        assert!(!window().check(&ctx_at_utc(15, 30)).is_protected);
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        // 15:00 UTC == 10:00 ET, 16:30 UTC == 11:30 ET.
        assert!(!window().check(&ctx_at_utc(15, 0)).is_protected);
        assert!(!window().check(&ctx_at_utc(16, 30)).is_protected);
    }

    #[test]
    fn outside_window_blocks() {
        // 14:59 UTC == 09:59 ET.
        let result = window().check(&ctx_at_utc(14, 59));
        assert!(result.is_protected);
        assert!(result.reason.unwrap().starts_with("outside_trade_window"));

        // 16:31 UTC == 11:31 ET.
        assert!(window().check(&ctx_at_utc(16, 31)).is_protected);
    }
}
