// =============================================================================
// Symbol properties — per-symbol trading constraints and rounding
// =============================================================================
//
// Prevents illegal orders before they reach the broker: wrong price
// increments, wrong lot sizes, shorting non-shortable stock. Quantities and
// prices are rounded HERE, before order metadata is stored, so local
// metadata and the broker always agree on what was requested.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broker::types::BrokerError;
use crate::broker::BrokerApi;
use crate::types::OrderSide;

/// Fractional-share granularity accepted by the broker.
const FRACTIONAL_QTY_DP: u32 = 3;

/// Trading properties for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolProperties {
    pub symbol: String,
    /// Tick size.
    pub min_price_increment: Decimal,
    /// Minimum quantity increment for whole-share symbols.
    pub lot_size: u32,
    pub min_order_size: u32,
    pub max_order_size: Option<u32>,
    pub is_tradable: bool,
    pub is_shortable: bool,
    pub is_fractionable: bool,
}

impl SymbolProperties {
    /// Conservative defaults for a US equity: penny tick, whole shares.
    pub fn us_equity_defaults(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            min_price_increment: Decimal::new(1, 2),
            lot_size: 1,
            min_order_size: 1,
            max_order_size: None,
            is_tradable: true,
            is_shortable: true,
            is_fractionable: false,
        }
    }

    /// Round a price to the nearest valid increment.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.min_price_increment.is_zero() {
            return price;
        }
        (price / self.min_price_increment).round() * self.min_price_increment
    }

    /// Round a quantity to a valid size: fractional symbols quantize down to
    /// the supported granularity, whole-share symbols floor to the lot size.
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        if self.is_fractionable {
            return quantity.round_dp_with_strategy(FRACTIONAL_QTY_DP, RoundingStrategy::ToZero);
        }
        let lot = Decimal::from(self.lot_size.max(1));
        (quantity / lot).floor() * lot
    }

    /// Validate an order against the symbol's constraints.
    pub fn validate_order(
        &self,
        quantity: Decimal,
        price: Option<Decimal>,
        side: OrderSide,
    ) -> Result<(), String> {
        if !self.is_tradable {
            return Err(format!("{} is not tradable", self.symbol));
        }
        if side == OrderSide::Sell && !self.is_shortable {
            return Err(format!("{} is not shortable", self.symbol));
        }
        if quantity <= Decimal::ZERO {
            return Err(format!("quantity {quantity} is not positive"));
        }
        if !self.is_fractionable && quantity < Decimal::from(self.min_order_size) {
            return Err(format!(
                "quantity {quantity} below minimum {}",
                self.min_order_size
            ));
        }
        if let Some(max) = self.max_order_size {
            if quantity > Decimal::from(max) {
                return Err(format!("quantity {quantity} exceeds maximum {max}"));
            }
        }
        if let Some(p) = price {
            if !self.min_price_increment.is_zero()
                && !(p / self.min_price_increment).fract().is_zero()
            {
                return Err(format!(
                    "price {p} not aligned to increment {}",
                    self.min_price_increment
                ));
            }
        }
        Ok(())
    }
}

/// Process-lifetime cache of symbol properties, filled from the broker on
/// first use per symbol.
pub struct SymbolPropertiesCache {
    broker: Arc<dyn BrokerApi>,
    cache: Mutex<HashMap<String, SymbolProperties>>,
}

impl SymbolPropertiesCache {
    pub fn new(broker: Arc<dyn BrokerApi>) -> Self {
        Self {
            broker,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, symbol: &str) -> Result<SymbolProperties, BrokerError> {
        let key = symbol.to_uppercase();
        if let Some(props) = self.cache.lock().get(&key) {
            return Ok(props.clone());
        }

        let props = self.broker.get_symbol_info(&key).await?;
        debug!(symbol = %key, "symbol properties cached");
        self.cache.lock().insert(key, props.clone());
        Ok(props)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spy() -> SymbolProperties {
        SymbolProperties::us_equity_defaults("SPY")
    }

    #[test]
    fn price_rounds_to_tick() {
        let p = spy();
        assert_eq!(p.round_price(dec!(450.127)), dec!(450.13));
        assert_eq!(p.round_price(dec!(450.124)), dec!(450.12));
        assert_eq!(p.round_price(dec!(450.12)), dec!(450.12));
    }

    #[test]
    fn whole_share_quantity_floors_to_lot() {
        let mut p = spy();
        p.lot_size = 100;
        assert_eq!(p.round_quantity(dec!(250)), dec!(200));
        assert_eq!(p.round_quantity(dec!(150)), dec!(100));
        assert_eq!(p.round_quantity(dec!(99)), dec!(0));
    }

    #[test]
    fn fractional_quantity_truncates_to_granularity() {
        let mut p = spy();
        p.is_fractionable = true;
        assert_eq!(p.round_quantity(dec!(0.12399)), dec!(0.123));
        assert_eq!(p.round_quantity(dec!(1.5)), dec!(1.5));
    }

    #[test]
    fn validation_rejects_untradable_and_unshortable() {
        let mut p = spy();
        p.is_tradable = false;
        assert!(p.validate_order(dec!(1), None, OrderSide::Buy).is_err());

        let mut p = spy();
        p.is_shortable = false;
        assert!(p.validate_order(dec!(1), None, OrderSide::Sell).is_err());
        assert!(p.validate_order(dec!(1), None, OrderSide::Buy).is_ok());
    }

    #[test]
    fn validation_rejects_misaligned_limit_price() {
        let p = spy();
        assert!(p.validate_order(dec!(1), Some(dec!(99.905)), OrderSide::Buy).is_err());
        assert!(p.validate_order(dec!(1), Some(dec!(99.90)), OrderSide::Buy).is_ok());
    }

    #[test]
    fn validation_enforces_min_and_max_size() {
        let mut p = spy();
        p.max_order_size = Some(10);
        assert!(p.validate_order(dec!(0), None, OrderSide::Buy).is_err());
        assert!(p.validate_order(dec!(11), None, OrderSide::Buy).is_err());
        assert!(p.validate_order(dec!(10), None, OrderSide::Buy).is_ok());

        p.is_fractionable = true;
        // Fractional symbols may trade below one share.
        assert!(p.validate_order(dec!(0.5), None, OrderSide::Buy).is_ok());
    }
}
