// =============================================================================
// Risk manager — last line of defense before capital deployment
// =============================================================================
//
// Every trade is validated before submission. The manager is fail-closed:
// it rejects on anything it cannot prove safe, and it may CAP a quantity
// downward — the capped quantity is the one the caller must send to
// execution.
//
// Checks, in order: quantity/price sanity, daily loss limit, max open
// positions, PDT compliance, position-size caps (absolute USD and % of
// portfolio), and buying power net of the reserve already committed to
// in-flight BUY LIMIT orders.
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, warn};

use crate::risk::sizing::NotionalPositionSizer;
use crate::state::limits::LimitsTracker;
use crate::state::position_store::PositionStore;
use crate::types::OrderSide;

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of pre-trade validation.
#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: Option<String>,
    /// Quantity the caller is allowed to submit (may be lower than asked).
    pub approved_qty: Option<Decimal>,
    pub details: serde_json::Value,
}

impl RiskDecision {
    fn rejected(reason: impl Into<String>, details: serde_json::Value) -> Self {
        let reason = reason.into();
        warn!(reason = %reason, "risk rejected trade");
        Self {
            approved: false,
            reason: Some(reason),
            approved_qty: None,
            details,
        }
    }

    fn approved(qty: Decimal, details: serde_json::Value) -> Self {
        Self {
            approved: true,
            reason: None,
            approved_qty: Some(qty),
            details,
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskManagerParams {
    /// Hard cap on a single position's notional, USD.
    pub max_position_value_usd: Decimal,
    /// Cap on a single position as a fraction of portfolio value.
    pub max_position_pct: Decimal,
    pub max_open_positions: u32,
    /// Buying power that must remain untouched after the trade.
    pub min_buying_power_reserve: Decimal,
    /// Equity below which day-trade counting applies.
    pub pdt_equity_threshold: Decimal,
    /// Day trades allowed under the threshold (rolling-window accounting is
    /// tracked by the limits tracker).
    pub max_day_trades: u32,
    /// Total filled trades allowed per session.
    pub max_daily_trades: u32,
}

impl Default for RiskManagerParams {
    fn default() -> Self {
        Self {
            max_position_value_usd: Decimal::from(1_000),
            max_position_pct: Decimal::new(10, 2), // 10 %
            max_open_positions: 3,
            min_buying_power_reserve: Decimal::ZERO,
            pdt_equity_threshold: Decimal::from(25_000),
            max_day_trades: 3,
            max_daily_trades: 50,
        }
    }
}

pub struct RiskManager {
    params: RiskManagerParams,
    limits: Arc<LimitsTracker>,
    positions: Arc<PositionStore>,
    sizer: NotionalPositionSizer,
}

impl RiskManager {
    pub fn new(
        params: RiskManagerParams,
        limits: Arc<LimitsTracker>,
        positions: Arc<PositionStore>,
    ) -> Self {
        let sizer = NotionalPositionSizer::new(params.max_position_pct);
        Self {
            params,
            limits,
            positions,
            sizer,
        }
    }

    /// Validate (and possibly cap) one trade.
    ///
    /// `reserved_buying_power` is the notional already committed to
    /// in-flight BUY LIMIT orders; it is subtracted from the reported
    /// buying power before the reserve check.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_trade(
        &self,
        symbol: &str,
        quantity: Decimal,
        side: OrderSide,
        price: Decimal,
        account_value: Decimal,
        buying_power: Decimal,
        reserved_buying_power: Decimal,
        strategy: &str,
    ) -> RiskDecision {
        let base_details = json!({
            "symbol": symbol.to_uppercase(),
            "side": side.to_string(),
            "requested_qty": quantity.to_string(),
            "price": price.to_string(),
            "account_value": account_value.to_string(),
            "buying_power": buying_power.to_string(),
            "reserved_buying_power": reserved_buying_power.to_string(),
            "strategy": strategy,
        });

        if quantity <= Decimal::ZERO {
            return RiskDecision::rejected("non_positive_quantity", base_details);
        }
        if price <= Decimal::ZERO {
            return RiskDecision::rejected("non_positive_price", base_details);
        }

        if self.limits.is_loss_limit_breached() {
            return RiskDecision::rejected("daily_loss_limit_breached", base_details);
        }

        // Exits release risk; only the sanity checks above apply. The daily
        // trade cap must never strand an open position.
        if side == OrderSide::Sell {
            return RiskDecision::approved(quantity, base_details);
        }

        if self.params.max_daily_trades > 0
            && self.limits.trades_today() >= self.params.max_daily_trades
        {
            return RiskDecision::rejected(
                format!("max_daily_trades:{}", self.params.max_daily_trades),
                base_details,
            );
        }

        // ---- max open positions -------------------------------------------
        if !self.positions.has_open_position(symbol)
            && self.positions.open_count() as u32 >= self.params.max_open_positions
        {
            return RiskDecision::rejected(
                format!("max_open_positions:{}", self.params.max_open_positions),
                base_details,
            );
        }

        // ---- PDT compliance -----------------------------------------------
        if account_value < self.params.pdt_equity_threshold
            && self.limits.day_trades_today() >= self.params.max_day_trades
        {
            return RiskDecision::rejected(
                format!(
                    "pdt_day_trade_limit:{} (equity below {})",
                    self.params.max_day_trades, self.params.pdt_equity_threshold
                ),
                base_details,
            );
        }

        // ---- position size caps -------------------------------------------
        let pct_cap_qty = self.sizer.max_quantity(account_value, Decimal::ZERO, price);
        let usd_cap_qty = self.params.max_position_value_usd / price;
        let mut approved_qty = quantity.min(pct_cap_qty).min(usd_cap_qty);

        if approved_qty <= Decimal::ZERO {
            return RiskDecision::rejected(
                format!(
                    "position_size_cap:max_usd={} max_pct={}",
                    self.params.max_position_value_usd, self.params.max_position_pct
                ),
                base_details,
            );
        }

        // ---- buying power net of reservations -----------------------------
        let available =
            buying_power - reserved_buying_power - self.params.min_buying_power_reserve;
        if available <= Decimal::ZERO {
            return RiskDecision::rejected("insufficient_buying_power", base_details);
        }
        if approved_qty * price > available {
            approved_qty = available / price;
        }
        if approved_qty <= Decimal::ZERO {
            return RiskDecision::rejected("insufficient_buying_power", base_details);
        }

        if approved_qty < quantity {
            debug!(
                symbol,
                requested = %quantity,
                approved = %approved_qty,
                "risk capped quantity downward"
            );
        }

        let mut details = base_details;
        if let Some(obj) = details.as_object_mut() {
            obj.insert("approved_qty".into(), json!(approved_qty.to_string()));
            obj.insert(
                "available_buying_power".into(),
                json!(available.to_string()),
            );
        }
        RiskDecision::approved(approved_qty, details)
    }
}
