// =============================================================================
// Volatility halt — block entries when rolling return volatility spikes
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use rust_decimal::{Decimal, MathematicalOps};

use crate::protections::{Protection, ProtectionContext, ProtectionResult};

/// Blocks a symbol while the standard deviation of its simple returns over
/// the rolling window exceeds the threshold.
pub struct VolatilityHalt {
    window: usize,
    /// Std-dev threshold on simple (per-update) returns.
    threshold: Decimal,
    prices: Mutex<HashMap<String, VecDeque<Decimal>>>,
}

impl VolatilityHalt {
    pub fn new(window: usize, threshold: Decimal) -> Self {
        Self {
            window: window.max(2),
            threshold,
            prices: Mutex::new(HashMap::new()),
        }
    }

    fn rolling_std(&self, symbol: &str) -> Option<Decimal> {
        let prices = self.prices.lock();
        let series = prices.get(symbol)?;
        if series.len() < self.window {
            return None;
        }

        let returns: Vec<Decimal> = series
            .iter()
            .zip(series.iter().skip(1))
            .filter(|(prev, _)| !prev.is_zero())
            .map(|(prev, next)| (next - prev) / prev)
            .collect();
        if returns.is_empty() {
            return None;
        }

        let n = Decimal::from(returns.len());
        let mean: Decimal = returns.iter().sum::<Decimal>() / n;
        let variance: Decimal = returns
            .iter()
            .map(|r| (r - mean) * (r - mean))
            .sum::<Decimal>()
            / n;
        variance.sqrt()
    }
}

impl Protection for VolatilityHalt {
    fn name(&self) -> &'static str {
        "volatility_halt"
    }

    fn check(&self, ctx: &ProtectionContext) -> ProtectionResult {
        match self.rolling_std(&ctx.symbol) {
            Some(std) if std > self.threshold => ProtectionResult::blocked(
                format!("volatility_halt:std={std}>threshold={}", self.threshold),
                None,
            ),
            _ => ProtectionResult::clear(),
        }
    }

    fn update_market_data(&self, symbol: &str, price: Decimal) {
        if price <= Decimal::ZERO {
            return;
        }
        let mut prices = self.prices.lock();
        let series = prices.entry(symbol.to_uppercase()).or_default();
        series.push_back(price);
        while series.len() > self.window {
            series.pop_front();
        }
    }
}
