// =============================================================================
// VWAP micro mean-reversion — long-only SPY reversion vs intraday VWAP
// =============================================================================
//
// A micro-account strategy meant to validate correctness, controls, and
// execution integrity rather than chase alpha:
//   - LONG-only mean reversion against intraday VWAP, SPY only
//   - time-gated entries (default 10:00–11:30 ET), forced flat near close
//   - risk-dollar sizing with a hard notional cap
//   - max trades per day, self-disable after the daily loss estimate
//
// The strategy never reads the wall clock: all time decisions come from
// bar timestamps converted to Eastern.
// =============================================================================

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::America::New_York;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;

use crate::data::bar::{Bar, Timeframe};
use crate::strategy::registry::StrategySpec;
use crate::strategy::signals::Signal;
use crate::strategy::{SignalOutput, Strategy};
use crate::types::{OrderSide, OrderType};

// ---------------------------------------------------------------------------
// Parameter helpers
// ---------------------------------------------------------------------------

fn param_decimal(params: &Value, key: &str, default: &str) -> Decimal {
    let parsed = match params.get(key) {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.to_string().parse().ok(),
        _ => None,
    };
    parsed.unwrap_or_else(|| default.parse().expect("valid default decimal"))
}

fn param_u32(params: &Value, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .unwrap_or(default)
}

fn param_time(params: &Value, key: &str, default: &str) -> NaiveTime {
    let raw = params.get(key).and_then(Value::as_str).unwrap_or(default);
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .unwrap_or_else(|_| NaiveTime::parse_from_str(default, "%H:%M").expect("valid default time"))
}

// ---------------------------------------------------------------------------
// VWAP state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VwapState {
    trading_day: Option<NaiveDate>,
    pv_sum: Decimal,
    v_sum: Decimal,
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

pub struct VwapMicroMeanReversion {
    name: String,
    symbols: Vec<String>,
    timeframe: Timeframe,

    // Parameters
    vwap_min_bars: u32,
    entry_deviation_pct: Decimal,
    stop_loss_pct: Decimal,
    risk_dollars_per_trade: Decimal,
    max_trades_per_day: u32,
    daily_loss_limit_usd: Decimal,
    max_notional_usd: Decimal,
    trade_start: NaiveTime,
    trade_end: NaiveTime,
    flat_time: NaiveTime,
    entry_limit_offset_bps: u32,
    entry_limit_ttl_seconds: u64,

    // Intraday state
    vwap: VwapState,
    bars_today: u32,
    trades_today: u32,
    disabled_today: bool,
    daily_pnl_est: Decimal,

    // Position tracking (updated via order events; durable truth lives in
    // the position store)
    in_position: bool,
    entry_price: Option<Decimal>,
    entry_qty: Option<Decimal>,
}

impl VwapMicroMeanReversion {
    pub fn from_spec(spec: &StrategySpec) -> Self {
        let p = &spec.parameters;
        Self {
            name: spec.name.clone(),
            // Hard constraint: this strategy trades SPY only.
            symbols: vec!["SPY".to_string()],
            timeframe: spec.timeframe,
            vwap_min_bars: param_u32(p, "vwap_min_bars", 20),
            entry_deviation_pct: param_decimal(p, "entry_deviation_pct", "0.003"),
            stop_loss_pct: param_decimal(p, "stop_loss_pct", "0.003"),
            risk_dollars_per_trade: param_decimal(p, "risk_dollars_per_trade", "1.50"),
            max_trades_per_day: param_u32(p, "max_trades_per_day", 1),
            daily_loss_limit_usd: param_decimal(p, "daily_loss_limit_usd", "2.50"),
            max_notional_usd: param_decimal(p, "max_notional_usd", "50"),
            trade_start: param_time(p, "trade_start_time", "10:00"),
            trade_end: param_time(p, "trade_end_time", "11:30"),
            flat_time: param_time(p, "flat_time", "15:55"),
            entry_limit_offset_bps: param_u32(p, "entry_limit_offset_bps", 0),
            entry_limit_ttl_seconds: param_u32(p, "entry_limit_ttl_seconds", 90) as u64,
            vwap: VwapState::default(),
            bars_today: 0,
            trades_today: 0,
            disabled_today: false,
            daily_pnl_est: Decimal::ZERO,
            in_position: false,
            entry_price: None,
            entry_qty: None,
        }
    }

    fn reset_if_new_day(&mut self, day: NaiveDate) {
        if self.vwap.trading_day != Some(day) {
            self.vwap = VwapState {
                trading_day: Some(day),
                ..VwapState::default()
            };
            self.bars_today = 0;
            self.trades_today = 0;
            self.disabled_today = false;
            self.daily_pnl_est = Decimal::ZERO;
            self.in_position = false;
            self.entry_price = None;
            self.entry_qty = None;
        }
    }

    /// Update intraday VWAP with one bar; None until warmed up.
    fn update_vwap(&mut self, bar: &Bar) -> Option<Decimal> {
        let typical = (bar.high + bar.low + bar.close) / Decimal::from(3);
        let volume = Decimal::from(bar.volume.unwrap_or(1).max(1));

        self.vwap.pv_sum += typical * volume;
        self.vwap.v_sum += volume;
        self.bars_today += 1;

        if self.bars_today < self.vwap_min_bars || self.vwap.v_sum.is_zero() {
            return None;
        }
        Some(self.vwap.pv_sum / self.vwap.v_sum)
    }

    /// Risk-based sizing: qty = risk dollars / (price * stop pct), capped by
    /// the notional ceiling, quantized to broker fractional granularity.
    fn position_size(&self, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let risk_per_share = price * self.stop_loss_pct;
        if risk_per_share <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let mut qty = self.risk_dollars_per_trade / risk_per_share;
        if qty * price > self.max_notional_usd {
            qty = self.max_notional_usd / price;
        }
        qty.round_dp_with_strategy(3, RoundingStrategy::ToZero)
    }

    fn exit_signal(&self, bar: &Bar, reason: &str) -> Signal {
        Signal {
            symbol: bar.symbol.clone(),
            side: OrderSide::Sell,
            quantity: self.entry_qty.unwrap_or(Decimal::ZERO),
            order_type: OrderType::Market,
            entry_price: Some(bar.close),
            limit_price: None,
            ttl_seconds: None,
            stop_loss: None,
            take_profit: None,
            reason: reason.to_string(),
            strategy: self.name.clone(),
        }
    }
}

impl Strategy for VwapMicroMeanReversion {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    fn warmup_bars(&self) -> u32 {
        self.vwap_min_bars + 10
    }

    fn on_init(&mut self) {}

    fn on_bar(&mut self, bar: &Bar) -> SignalOutput {
        let et = bar.timestamp.with_timezone(&New_York);
        self.reset_if_new_day(et.date_naive());

        if self.disabled_today {
            return SignalOutput::None;
        }

        let vwap = match self.update_vwap(bar) {
            Some(v) => v,
            None => return SignalOutput::None, // warming up
        };

        let now_et = et.time();

        // Forced flat near the close.
        if self.in_position && now_et >= self.flat_time {
            return SignalOutput::Single(self.exit_signal(bar, "FORCE_FLAT_EOD"));
        }

        // In position: stop-loss first, then reversion to VWAP.
        if self.in_position {
            if let (Some(entry), Some(_qty)) = (self.entry_price, self.entry_qty) {
                let stop_price = entry * (Decimal::ONE - self.stop_loss_pct);
                if bar.close <= stop_price {
                    self.daily_pnl_est -= self.risk_dollars_per_trade;
                    if self.daily_pnl_est.abs() >= self.daily_loss_limit_usd {
                        self.disabled_today = true;
                    }
                    return SignalOutput::Single(self.exit_signal(bar, "STOP_LOSS"));
                }

                if bar.close >= vwap {
                    self.daily_pnl_est +=
                        self.risk_dollars_per_trade / Decimal::from(2);
                    return SignalOutput::Single(self.exit_signal(bar, "MEAN_REVERSION_TO_VWAP"));
                }
            }
            return SignalOutput::None;
        }

        // Flat: entry conditions.
        if now_et < self.trade_start || now_et > self.trade_end {
            return SignalOutput::None;
        }
        if self.trades_today >= self.max_trades_per_day {
            return SignalOutput::None;
        }

        let threshold = vwap * (Decimal::ONE - self.entry_deviation_pct);
        if bar.close < threshold {
            let qty = self.position_size(bar.close);
            if qty <= Decimal::ZERO {
                return SignalOutput::None;
            }

            self.trades_today += 1;
            let offset =
                Decimal::from(self.entry_limit_offset_bps) / Decimal::from(10_000);
            return SignalOutput::Single(Signal {
                symbol: bar.symbol.clone(),
                side: OrderSide::Buy,
                quantity: qty,
                order_type: OrderType::Limit,
                entry_price: Some(bar.close),
                limit_price: Some(bar.close * (Decimal::ONE - offset)),
                ttl_seconds: Some(self.entry_limit_ttl_seconds),
                stop_loss: Some(bar.close * (Decimal::ONE - self.stop_loss_pct)),
                take_profit: None, // exit handled by the reversion logic
                reason: format!("PRICE_BELOW_VWAP_BY_{}", self.entry_deviation_pct),
                strategy: self.name.clone(),
            });
        }

        SignalOutput::None
    }

    fn on_order_filled(
        &mut self,
        _order_id: &str,
        _symbol: &str,
        filled_qty: Decimal,
        fill_price: Decimal,
    ) -> Option<Signal> {
        // Minimal toggle; the position store is the durable truth.
        if !self.in_position {
            self.in_position = true;
            self.entry_price = Some(fill_price);
            self.entry_qty = Some(filled_qty);
        } else {
            self.in_position = false;
            self.entry_price = None;
            self.entry_qty = None;
        }
        None
    }

    fn on_stop(&mut self) {}
}
