// =============================================================================
// Cooldown gate — per (strategy, symbol, side) submission throttle
// =============================================================================
//
// Blocks a signal when the last SUCCESSFUL submission for the same key is
// younger than the cooldown. Only a successful submit updates the
// timestamp; blocked or failed attempts never extend the window.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::OrderSide;

type Key = (String, String, OrderSide);

/// Outcome of one cooldown check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownVerdict {
    pub blocked: bool,
    pub elapsed_seconds: f64,
}

pub struct CooldownGate {
    cooldown_seconds: i64,
    last_submission: Mutex<HashMap<Key, DateTime<Utc>>>,
}

impl CooldownGate {
    pub fn new(cooldown_seconds: i64) -> Self {
        Self {
            cooldown_seconds,
            last_submission: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown_seconds(&self) -> i64 {
        self.cooldown_seconds
    }

    fn key(strategy: &str, symbol: &str, side: OrderSide) -> Key {
        let strategy = if strategy.is_empty() { "UNKNOWN" } else { strategy };
        (strategy.to_string(), symbol.to_uppercase(), side)
    }

    /// Check whether a submission for this key should be blocked at `now`.
    pub fn check(&self, strategy: &str, symbol: &str, side: OrderSide, now: DateTime<Utc>) -> CooldownVerdict {
        if self.cooldown_seconds <= 0 {
            return CooldownVerdict {
                blocked: false,
                elapsed_seconds: 0.0,
            };
        }

        let last = self
            .last_submission
            .lock()
            .get(&Self::key(strategy, symbol, side))
            .copied();

        match last {
            None => CooldownVerdict {
                blocked: false,
                elapsed_seconds: 0.0,
            },
            Some(last) => {
                let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
                CooldownVerdict {
                    blocked: elapsed < self.cooldown_seconds as f64,
                    elapsed_seconds: elapsed,
                }
            }
        }
    }

    /// Record a successful submission for this key.
    pub fn record_submission(&self, strategy: &str, symbol: &str, side: OrderSide, now: DateTime<Utc>) {
        self.last_submission
            .lock()
            .insert(Self::key(strategy, symbol, side), now);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 9, 15, 0, 0).unwrap()
    }

    #[test]
    fn first_signal_is_never_blocked() {
        let gate = CooldownGate::new(30);
        assert!(!gate.check("vwap", "SPY", OrderSide::Buy, t0()).blocked);
    }

    #[test]
    fn blocks_within_window_and_releases_after() {
        let gate = CooldownGate::new(30);
        gate.record_submission("vwap", "SPY", OrderSide::Buy, t0());

        let v = gate.check("vwap", "SPY", OrderSide::Buy, t0() + Duration::seconds(29));
        assert!(v.blocked);
        assert!((v.elapsed_seconds - 29.0).abs() < 0.001);

        // Exactly at the cooldown boundary the window is over.
        assert!(!gate.check("vwap", "SPY", OrderSide::Buy, t0() + Duration::seconds(30)).blocked);
    }

    #[test]
    fn keys_are_independent_per_strategy_symbol_and_side() {
        let gate = CooldownGate::new(30);
        gate.record_submission("vwap", "SPY", OrderSide::Buy, t0());

        let now = t0() + Duration::seconds(1);
        assert!(gate.check("vwap", "SPY", OrderSide::Buy, now).blocked);
        assert!(!gate.check("vwap", "SPY", OrderSide::Sell, now).blocked);
        assert!(!gate.check("vwap", "QQQ", OrderSide::Buy, now).blocked);
        assert!(!gate.check("momo", "SPY", OrderSide::Buy, now).blocked);
    }

    #[test]
    fn zero_cooldown_disables_the_gate() {
        let gate = CooldownGate::new(0);
        gate.record_submission("vwap", "SPY", OrderSide::Buy, t0());
        assert!(!gate.check("vwap", "SPY", OrderSide::Buy, t0()).blocked);
    }

    #[test]
    fn unsuccessful_attempts_do_not_extend_the_window() {
        let gate = CooldownGate::new(30);
        gate.record_submission("vwap", "SPY", OrderSide::Buy, t0());

        // A blocked check at t+29 does NOT reset the timer; at t+30 it's free.
        assert!(gate.check("vwap", "SPY", OrderSide::Buy, t0() + Duration::seconds(29)).blocked);
        assert!(!gate.check("vwap", "SPY", OrderSide::Buy, t0() + Duration::seconds(30)).blocked);
    }
}
