// =============================================================================
// Notional position sizer — caps exposure relative to account value
// =============================================================================
//
// A $200 account must not attempt a $600 trade. Size is derived from the
// account value and the maximum exposure percentage, net of exposure
// already deployed.
// =============================================================================

use rust_decimal::Decimal;

/// Sizes positions by notional exposure.
#[derive(Debug, Clone)]
pub struct NotionalPositionSizer {
    /// Maximum exposure as a fraction of account value (0.10 = 10 %).
    max_exposure_pct: Decimal,
}

impl NotionalPositionSizer {
    pub fn new(max_exposure_pct: Decimal) -> Self {
        Self { max_exposure_pct }
    }

    /// Maximum notional available for a new position.
    pub fn available_notional(&self, account_value: Decimal, current_exposure: Decimal) -> Decimal {
        let budget = account_value * self.max_exposure_pct - current_exposure;
        budget.max(Decimal::ZERO)
    }

    /// Largest quantity affordable at `price` within the exposure budget.
    /// Returns an un-rounded decimal quantity; lot/fractional rounding is
    /// the symbol-properties layer's job.
    pub fn max_quantity(
        &self,
        account_value: Decimal,
        current_exposure: Decimal,
        price: Decimal,
    ) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.available_notional(account_value, current_exposure) / price
    }
}

/// Exposure of a position value relative to account value, as a fraction.
pub fn exposure_pct(position_value: Decimal, account_value: Decimal) -> Decimal {
    if account_value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    position_value / account_value
}
