// =============================================================================
// Runtime application — the trading loop for paper and live modes
// =============================================================================
//
// One cycle per tick:
//   [1] market-hours gate (cached broker clock, fail-closed)
//   [2] account snapshot (safe-parsed decimals)
//   [3] per symbol: bars -> staleness guard -> strategies -> signals
//   [4] per signal: trade id -> single-trade guard -> cooldown ->
//       protections -> risk -> submit -> wait -> fills -> position ->
//       protective stop
//   [5] periodic orphan/shadow drift check
//   [6] circuit-breaker accounting and adaptive sleep
//
// SIGINT/SIGTERM flip a running flag; the current cycle always completes.
// Exit codes: 0 clean stop, 1 safety halt or runtime failure.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use chrono_tz::America::New_York;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::SystemClock;
use crate::config::{self, AppConfig};
use crate::container::Container;
use crate::data::bar::Timeframe;
use crate::orders::machine::OrderState;
use crate::reconcile::auto_heal_enabled;
use crate::recovery::RecoveryStatus;
use crate::strategy::registry::StrategySpec;
use crate::strategy::signals::Signal;
use crate::types::{OrderSide, OrderType, TradeMode};
use crate::universe::{UniverseLoader, UniverseMode};

/// Cycles between orphan/shadow drift checks.
const DRIFT_CHECK_INTERVAL: u64 = 10;
/// Sleep while the market is closed and no open is near.
const CLOSED_INTERVAL_SECONDS: u64 = 300;
/// Sleep inside the pre-open window.
const PRE_OPEN_INTERVAL_SECONDS: u64 = 30;
/// Minutes before the open that count as the pre-open window.
const PRE_OPEN_WINDOW_MINUTES: i64 = 10;
/// Bars fetched per symbol per cycle when no strategy asks for more.
const DEFAULT_BAR_LOOKBACK: u32 = 120;
/// Poll cadence and timeout for market-order fills.
const MARKET_WAIT_SECONDS: u64 = 15;
/// TTL fallback for LIMIT entries without an explicit ttl_seconds.
const DEFAULT_LIMIT_TTL_SECONDS: u64 = 90;

// ---------------------------------------------------------------------------
// Options and helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: TradeMode,
    pub config_path: PathBuf,
    pub run_interval_s: u64,
    pub run_once: bool,
}

/// Parse a broker-reported decimal, degrading to zero on garbage so one
/// malformed account field cannot kill a cycle.
fn safe_decimal(raw: &str) -> Decimal {
    raw.trim().parse().unwrap_or(Decimal::ZERO)
}

fn short_hex(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

/// Sleep policy between cycles. Open markets tick at the base interval; a
/// known open inside the pre-open window (inclusive) tightens the cadence;
/// otherwise the closed interval applies. Never below one second.
pub fn compute_adaptive_sleep(
    market_open: bool,
    next_open_utc: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    base_interval_s: u64,
    closed_interval_s: u64,
    pre_open_interval_s: u64,
    pre_open_window_m: i64,
) -> u64 {
    let chosen = if market_open {
        base_interval_s
    } else {
        match next_open_utc {
            Some(next_open)
                if next_open >= now
                    && (next_open - now) <= chrono::Duration::minutes(pre_open_window_m) =>
            {
                pre_open_interval_s
            }
            _ => closed_interval_s,
        }
    };
    chosen.max(1)
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

struct CycleReport {
    market_open: bool,
    next_open: Option<DateTime<Utc>>,
}

pub struct Runtime {
    container: Container,
    cfg: AppConfig,
    mode: TradeMode,
    run_interval_s: u64,
    run_once: bool,
    running: Arc<AtomicBool>,
    symbols: Vec<String>,
    lookback_bars: u32,
    cycle_count: u64,
    config_hash: String,
}

impl Runtime {
    pub fn new(container: Container, cfg: AppConfig, opts: &RunOptions, config_hash: String) -> Self {
        Self {
            container,
            cfg,
            mode: opts.mode,
            run_interval_s: opts.run_interval_s.max(1),
            run_once: opts.run_once,
            running: Arc::new(AtomicBool::new(true)),
            symbols: Vec::new(),
            lookback_bars: DEFAULT_BAR_LOOKBACK,
            cycle_count: 0,
            config_hash,
        }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    /// Recovery, startup reconciliation, protective-stop reload, and
    /// strategy bootstrap. `Err(code)` carries the process exit code.
    pub async fn startup(&mut self) -> Result<(), i32> {
        let c = &mut self.container;
        let paper = self.mode.is_paper();

        c.journal.write_event(json!({
            "event": "boot",
            "mode": self.mode.to_string(),
            "paper": paper,
        }));

        // ---- crash recovery ----------------------------------------------
        if self.cfg.session.startup_recovery_enabled {
            let report = c.recovery.recover().await;
            c.journal.write_event(json!({
                "event": "recovery_report",
                "status": report.status,
                "positions_recovered": report.positions_recovered,
                "positions_rebuilt": report.positions_rebuilt,
                "orders_cancelled": report.orders_cancelled,
                "recovery_time_seconds": report.recovery_time_seconds,
            }));
            if report.status == RecoveryStatus::Failed {
                error!("recovery failed, halting for safety");
                return Err(1);
            }
        }

        // ---- startup reconciliation --------------------------------------
        match c.reconciler.reconcile_startup().await {
            Err(e) => {
                if self.mode == TradeMode::Live {
                    error!(error = %e, "live startup reconciliation failed, halting");
                    return Err(1);
                }
                warn!(error = %e, "paper startup reconciliation failed, continuing");
            }
            Ok(discrepancies) if !discrepancies.is_empty() => {
                if self.mode == TradeMode::Live {
                    error!(
                        count = discrepancies.len(),
                        "LIVE MODE HALT: startup reconciliation found discrepancies"
                    );
                    return Err(1);
                }
                if auto_heal_enabled() {
                    c.journal.write_event(json!({
                        "event": "auto_heal_started",
                        "count": discrepancies.len(),
                    }));
                    let healed = c.reconciler.auto_heal(&discrepancies, &c.journal);
                    c.journal.write_event(json!({
                        "event": "auto_heal_completed",
                        "healed": healed,
                    }));
                } else {
                    c.journal.write_event(json!({
                        "event": "startup_reconcile_discrepancies",
                        "count": discrepancies.len(),
                    }));
                    warn!(
                        count = discrepancies.len(),
                        "paper reconcile found discrepancies (auto-heal disabled)"
                    );
                }
            }
            Ok(_) => {}
        }

        // ---- protective-stop map reload -----------------------------------
        match c.broker.list_open_orders().await {
            Ok(open_orders) => {
                let loaded = c.stops.reload_from_broker(&open_orders);
                if loaded > 0 {
                    info!(count = loaded, "protective stops reloaded from broker");
                }
            }
            Err(e) => warn!(error = %e, "protective-stop reload failed, starting empty"),
        }

        // ---- strategy bootstrap -------------------------------------------
        let universe_symbols = std::env::var("UNIVERSE_MODE").ok().map(|mode| {
            let data_dir = std::env::var("UNIVERSE_DATA_DIR")
                .unwrap_or_else(|_| "data/universe".to_string());
            UniverseLoader::new(UniverseMode::parse(&mode), data_dir).symbols()
        });

        for entry in self.cfg.strategies.iter().filter(|s| s.enabled) {
            let timeframe = Timeframe::parse(&entry.timeframe).unwrap_or(Timeframe::Min1);
            let symbols = universe_symbols
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| entry.symbols.clone());

            let spec = StrategySpec {
                name: entry.name.clone(),
                symbols,
                timeframe,
                parameters: entry.parameters.clone(),
            };

            let strategy = c.registry.create(&spec).map_err(|e| {
                error!(strategy = %entry.name, error = %e, "strategy creation failed");
                1
            })?;
            c.lifecycle.add_strategy(strategy).map_err(|e| {
                error!(strategy = %entry.name, error = %e, "strategy registration failed");
                1
            })?;
            c.lifecycle.start_strategy(&entry.name).map_err(|e| {
                error!(strategy = %entry.name, error = %e, "strategy start failed");
                1
            })?;
        }

        self.symbols = c.lifecycle.all_symbols();
        self.lookback_bars = self
            .cfg
            .strategies
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.lookback_bars)
            .max()
            .unwrap_or(DEFAULT_BAR_LOOKBACK)
            .max(1);
        c.journal.write_event(json!({
            "event": "startup_config_summary",
            "mode": self.mode.to_string(),
            "paper": paper,
            "symbols": self.symbols,
            "strategies": c.lifecycle.enabled_strategies(),
            "config_hash": self.config_hash,
        }));

        info!(mode = %self.mode, symbols = ?self.symbols, "startup complete");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    pub async fn run_loop(&mut self) -> i32 {
        info!(
            mode = %self.mode,
            interval_s = self.run_interval_s,
            run_once = self.run_once,
            "runtime loop starting"
        );

        while self.running.load(Ordering::SeqCst) {
            match self.run_cycle().await {
                Ok(report) => {
                    self.container.breaker.record_success();
                    if self.run_once {
                        break;
                    }

                    let sleep_s = compute_adaptive_sleep(
                        report.market_open,
                        report.next_open,
                        self.container.clock.now_utc(),
                        self.run_interval_s,
                        CLOSED_INTERVAL_SECONDS,
                        PRE_OPEN_INTERVAL_SECONDS,
                        PRE_OPEN_WINDOW_MINUTES,
                    );
                    tokio::time::sleep(StdDuration::from_secs(sleep_s)).await;
                }
                Err(e) => {
                    self.container
                        .journal
                        .write_event(json!({ "event": "runtime_error", "error": e.to_string() }));
                    error!(error = %e, "runtime cycle failed");

                    self.container.breaker.record_failure();
                    if self.container.breaker.is_tripped() {
                        error!(
                            failures = self.container.breaker.failure_count(),
                            "CIRCUIT BREAKER TRIPPED, halting"
                        );
                        return 1;
                    }
                    if self.run_once {
                        return 1;
                    }
                    tokio::time::sleep(StdDuration::from_secs(self.run_interval_s)).await;
                }
            }
        }

        info!("runtime loop stopped");
        0
    }

    // -------------------------------------------------------------------------
    // One cycle
    // -------------------------------------------------------------------------

    async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        // ---- [1] market-hours gate ----------------------------------------
        let snapshot = self.container.market_clock.snapshot().await;
        if !snapshot.is_open {
            self.container.journal.write_event(json!({
                "event": "MARKET_CLOSED_BLOCK",
                "next_open_utc": snapshot.next_open.map(|t| t.to_rfc3339()),
                "next_open_ny": snapshot
                    .next_open
                    .map(|t| t.with_timezone(&New_York).to_rfc3339()),
            }));
            self.bump_cycle();
            return Ok(CycleReport {
                market_open: false,
                next_open: snapshot.next_open,
            });
        }

        // ---- [2] account snapshot -----------------------------------------
        let account = self.container.broker.get_account_info().await?;
        let account_value = safe_decimal(&account.portfolio_value);
        let buying_power = safe_decimal(&account.buying_power);
        self.container.protections.update_equity(account_value);

        // ---- [3] per symbol ------------------------------------------------
        for symbol in self.symbols.clone() {
            let bars = match self
                .container
                .provider
                .latest_bars(&symbol, Timeframe::Min1, self.lookback_bars)
                .await
            {
                Ok(bars) => bars,
                Err(e) => {
                    self.container.journal.write_event(json!({
                        "event": "market_data_error",
                        "symbol": symbol,
                        "error": e.to_string(),
                    }));
                    warn!(symbol = %symbol, error = %e, "market data error, skipping symbol");
                    continue;
                }
            };

            let now = self.container.clock.now_utc();
            let verdict =
                self.container
                    .staleness
                    .evaluate(&symbol, bars.last(), Timeframe::Min1, now);
            if !verdict.ok {
                self.container.journal.write_event(verdict.event.clone());
                continue;
            }
            let bar = bars.last().expect("verdict passed implies a bar");

            self.container
                .protections
                .update_market_data(&symbol, bar.close);

            let signals = self.container.lifecycle.on_bar(bar)?;
            let bar_close = bar.close;
            for signal in signals {
                self.process_signal(signal, bar_close, account_value, buying_power)
                    .await;
            }
        }

        // ---- [5] drift check -----------------------------------------------
        self.bump_cycle();
        if self.cycle_count % DRIFT_CHECK_INTERVAL == 0 {
            self.drift_check().await;
        }

        Ok(CycleReport {
            market_open: true,
            next_open: snapshot.next_open,
        })
    }

    fn bump_cycle(&mut self) {
        self.cycle_count += 1;
    }

    async fn drift_check(&self) {
        match self.container.broker.list_open_orders().await {
            Ok(open_orders) => {
                let broker_ids: Vec<String> = open_orders.iter().map(|o| o.id.clone()).collect();
                let orphans = self.container.tracker.orphaned_orders(&broker_ids);
                let shadows = self.container.tracker.shadow_orders(&broker_ids);

                if orphans.is_empty() && shadows.is_empty() {
                    info!("drift check: no orphan or shadow orders");
                } else {
                    error!(
                        orphans = ?orphans,
                        shadows = ?shadows,
                        "drift check found orphan/shadow orders, manual review required"
                    );
                }
                self.container.journal.write_event(json!({
                    "event": "drift_check",
                    "orphans": orphans,
                    "shadows": shadows,
                }));
            }
            Err(e) => warn!(error = %e, "drift check failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Signal pipeline
    // -------------------------------------------------------------------------

    async fn process_signal(
        &mut self,
        signal: Signal,
        bar_close: Decimal,
        account_value: Decimal,
        buying_power: Decimal,
    ) {
        let now = self.container.clock.now_utc();
        let trade_id = format!(
            "{}:{}:{}:{}",
            signal.strategy,
            signal.symbol,
            now.date_naive(),
            short_hex(10),
        );

        self.container.journal.write_event(json!({
            "event": "signal_received",
            "trade_id": trade_id,
            "signal": signal.to_value(),
        }));

        if signal.quantity <= Decimal::ZERO {
            return;
        }

        let symbol = signal.symbol.clone();
        let side = signal.side;
        let is_exit = signal.is_exit();

        // ---- single-trade guard (entries only) ----------------------------
        if !is_exit {
            let verdict = self
                .container
                .single_trade
                .check_entry(
                    &symbol,
                    &self.container.positions,
                    &self.container.engine,
                    &self.container.broker,
                )
                .await;
            if verdict.blocked {
                self.container.journal.write_event(json!({
                    "event": "single_trade_block",
                    "trade_id": trade_id,
                    "strategy": signal.strategy,
                    "symbol": symbol,
                    "side": side.to_string(),
                    "qty": signal.quantity.to_string(),
                    "has_position": verdict.has_position,
                    "has_open_order": verdict.has_open_order,
                    "reason": verdict.reason,
                }));
                return;
            }
        }

        // ---- cooldown ------------------------------------------------------
        let cooldown = self
            .container
            .cooldown
            .check(&signal.strategy, &symbol, side, now);
        if cooldown.blocked {
            self.container.journal.write_event(json!({
                "event": "signal_cooldown_block",
                "trade_id": trade_id,
                "strategy": signal.strategy,
                "symbol": symbol,
                "side": side.to_string(),
                "qty": signal.quantity.to_string(),
                "cooldown_seconds": self.container.cooldown.cooldown_seconds(),
                "elapsed_seconds": cooldown.elapsed_seconds,
                "reason": "cooldown_active",
            }));
            return;
        }

        // ---- protections ---------------------------------------------------
        let protection = self.container.protections.check(&symbol);
        if protection.is_protected {
            self.container.journal.write_event(json!({
                "event": "protection_block",
                "trade_id": trade_id,
                "symbol": symbol,
                "side": side.to_string(),
                "qty": signal.quantity.to_string(),
                "reason": protection.reason,
            }));
            return;
        }

        // ---- risk ----------------------------------------------------------
        let risk_price = signal
            .limit_price
            .or(signal.entry_price)
            .unwrap_or(bar_close);
        let reserved = self.container.engine.reserved_buying_power();
        let decision = self.container.risk.validate_trade(
            &symbol,
            signal.quantity,
            side,
            risk_price,
            account_value,
            buying_power,
            reserved,
            &signal.strategy,
        );

        self.container.journal.write_event(json!({
            "event": "risk_decision",
            "trade_id": trade_id,
            "approved": decision.approved,
            "reason": decision.reason,
            "details": decision.details,
        }));
        if !decision.approved {
            return;
        }

        let mut quantity = if side == OrderSide::Buy {
            decision.approved_qty.unwrap_or(signal.quantity)
        } else {
            signal.quantity
        };

        // ---- position-aware enforcement -----------------------------------
        let prior_position = self.container.positions.get(&symbol);
        match (&prior_position, side) {
            (Some(pos), OrderSide::Buy) if pos.qty > Decimal::ZERO => {
                info!(symbol = %symbol, pos_qty = %pos.qty, "already in position, skipping BUY");
                return;
            }
            (Some(pos), OrderSide::Sell) => {
                if pos.qty <= Decimal::ZERO {
                    info!(symbol = %symbol, "no position to sell, skipping");
                    return;
                }
                if quantity > pos.qty {
                    info!(
                        symbol = %symbol,
                        requested = %quantity,
                        pos_qty = %pos.qty,
                        "capping SELL quantity to position"
                    );
                    quantity = pos.qty;
                }
            }
            (None, OrderSide::Sell) => {
                info!(symbol = %symbol, "no position to sell, skipping");
                return;
            }
            _ => {}
        }
        if quantity <= Decimal::ZERO {
            return;
        }

        // ---- protective-stop cancellation before exits --------------------
        if side == OrderSide::Sell {
            if let Some(stop_id) = self.container.stops.stop_id(&symbol) {
                self.container.journal.write_event(json!({
                    "event": "protective_stop_cancel_requested",
                    "trade_id": trade_id,
                    "symbol": symbol,
                    "stop_broker_order_id": stop_id,
                    "reason": "exit_signal_cancel_protective_stop",
                }));
                let cancel_internal = format!("{}-STOPCXL-{}", signal.strategy, short_hex(6));
                if !self
                    .container
                    .engine
                    .cancel_order(&cancel_internal, &stop_id, "exit_signal_cancel_protective_stop")
                    .await
                {
                    warn!(symbol = %symbol, stop_id = %stop_id, "protective stop cancel failed");
                }
                let event = self
                    .container
                    .stops
                    .cancel(&symbol, "exit_signal_cancel_protective_stop", now);
                self.container.journal.write_event(event.to_value());
            }
        }

        // ---- submission ----------------------------------------------------
        let internal_id = format!("{}-{}", signal.strategy, short_hex(10));
        let ttl_seconds = signal.ttl_seconds.unwrap_or(DEFAULT_LIMIT_TTL_SECONDS);

        let broker_id = if signal.order_type == OrderType::Limit {
            let limit_price = match signal.limit_price {
                Some(p) => p,
                None => {
                    warn!(symbol = %symbol, "LIMIT signal missing limit_price, skipping");
                    return;
                }
            };

            self.container
                .cooldown
                .record_submission(&signal.strategy, &symbol, side, now);
            let broker_id = match self
                .container
                .engine
                .submit_limit_order(
                    &internal_id,
                    &symbol,
                    side,
                    quantity,
                    limit_price,
                    &signal.strategy,
                    signal.stop_loss,
                    signal.take_profit,
                )
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    self.order_error(&trade_id, &internal_id, &symbol, &e.to_string());
                    return;
                }
            };

            self.container.journal.write_event(json!({
                "event": "order_submitted",
                "trade_id": trade_id,
                "internal_order_id": internal_id,
                "broker_order_id": broker_id,
                "symbol": symbol,
                "side": side.to_string(),
                "qty": quantity.to_string(),
                "order_type": "LIMIT",
                "limit_price": limit_price.to_string(),
                "strategy": signal.strategy,
                "ttl_seconds": ttl_seconds,
            }));

            let final_status = self
                .container
                .engine
                .wait_for_order(&internal_id, &broker_id, ttl_seconds, StdDuration::from_secs(2))
                .await;

            if !matches!(final_status, OrderState::Filled | OrderState::PartiallyFilled) {
                // TTL expired without a fill: cancel, never chase.
                self.container
                    .engine
                    .cancel_order(&internal_id, &broker_id, "limit_ttl_expired_no_chase")
                    .await;
                self.container.journal.write_event(json!({
                    "event": "ORDER_TTL_CANCEL",
                    "internal_order_id": internal_id,
                    "broker_order_id": broker_id,
                    "symbol": symbol,
                    "side": side.to_string(),
                    "qty": quantity.to_string(),
                    "order_type": "LIMIT",
                    "limit_price": limit_price.to_string(),
                    "strategy": signal.strategy,
                    "ttl_seconds": ttl_seconds,
                    "final_status": final_status.to_string(),
                    "reason": "limit_ttl_expired_no_chase",
                }));
                return;
            }
            broker_id
        } else {
            self.container
                .cooldown
                .record_submission(&signal.strategy, &symbol, side, now);
            let broker_id = match self
                .container
                .engine
                .submit_market_order(
                    &internal_id,
                    &symbol,
                    side,
                    quantity,
                    &signal.strategy,
                    signal.stop_loss,
                    signal.take_profit,
                )
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    self.order_error(&trade_id, &internal_id, &symbol, &e.to_string());
                    return;
                }
            };

            self.container.journal.write_event(json!({
                "event": "order_submitted",
                "trade_id": trade_id,
                "internal_order_id": internal_id,
                "broker_order_id": broker_id,
                "symbol": symbol,
                "side": side.to_string(),
                "qty": quantity.to_string(),
                "order_type": "MARKET",
                "strategy": signal.strategy,
            }));

            self.container
                .engine
                .wait_for_order(
                    &internal_id,
                    &broker_id,
                    MARKET_WAIT_SECONDS,
                    StdDuration::from_secs(1),
                )
                .await;
            broker_id
        };

        // ---- fills, protective stop, accounting ---------------------------
        let (filled_qty, fill_price) = self.container.engine.get_fill_details(&internal_id);

        if side == OrderSide::Buy {
            if let (Some(stop_price), Some(filled)) = (signal.stop_loss, filled_qty) {
                let stop_internal = format!("{}-STOP-{}", signal.strategy, short_hex(6));
                match self
                    .container
                    .engine
                    .submit_stop_order(
                        &stop_internal,
                        &symbol,
                        OrderSide::Sell,
                        filled,
                        stop_price,
                        "protective_stop_after_entry",
                    )
                    .await
                {
                    Ok(stop_id) => {
                        let event = self.container.stops.place(
                            &symbol,
                            &stop_id,
                            Some(&internal_id),
                            Some(stop_price),
                            now,
                        );
                        self.container.journal.write_event(event.to_value());
                        self.container.journal.write_event(json!({
                            "event": "protective_stop_submitted",
                            "trade_id": trade_id,
                            "symbol": symbol,
                            "stop_broker_order_id": stop_id,
                            "stop_price": stop_price.to_string(),
                            "qty": filled.to_string(),
                        }));
                    }
                    Err(e) => {
                        error!(symbol = %symbol, error = %e, "protective stop placement failed");
                    }
                }
            }
        }

        if let (Some(filled), Some(price)) = (filled_qty, fill_price) {
            self.container.journal.write_event(json!({
                "event": "order_filled",
                "trade_id": trade_id,
                "internal_order_id": internal_id,
                "broker_order_id": broker_id,
                "symbol": symbol,
                "side": side.to_string(),
                "filled_qty": filled.to_string(),
                "fill_price": price.to_string(),
            }));

            if let Err(e) = self.container.limits.record_trade() {
                warn!(error = %e, "limits trade count update failed");
            }

            match side {
                OrderSide::Buy => {
                    if let Err(e) = self.container.positions.set_protection_levels(
                        &symbol,
                        signal.stop_loss,
                        signal.take_profit,
                    ) {
                        warn!(symbol = %symbol, error = %e, "position protection levels update failed");
                    }
                }
                OrderSide::Sell => {
                    if let Some(pos) = prior_position {
                        let pnl = (price - pos.entry_price) * filled;
                        if let Err(e) = self.container.limits.record_realized_pnl(pnl) {
                            warn!(error = %e, "realized PnL update failed");
                        }
                        self.container.protections.record_trade_result(&symbol, pnl);

                        let entry_day = pos.entry_time.with_timezone(&New_York).date_naive();
                        let today = now.with_timezone(&New_York).date_naive();
                        if entry_day == today {
                            if let Err(e) = self.container.limits.record_day_trade() {
                                warn!(error = %e, "day-trade count update failed");
                            }
                        }
                    }
                }
            }

            let fill_signal = self.container.lifecycle.on_order_filled(
                &signal.strategy,
                &internal_id,
                &symbol,
                filled,
                price,
            );
            if fill_signal.is_some() {
                // Follow-up intents are picked up on the next cycle's bar; a
                // same-cycle recursion would bypass the gate stack ordering.
                info!(strategy = %signal.strategy, "fill callback emitted a follow-up signal, deferred");
            }
        }
    }

    fn order_error(&self, trade_id: &str, internal_id: &str, symbol: &str, error: &str) {
        error!(trade_id, internal_id, symbol, error, "order submission failed");
        self.container.journal.write_event(json!({
            "event": "order_error",
            "trade_id": trade_id,
            "internal_order_id": internal_id,
            "symbol": symbol,
            "error": error,
        }));
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the trading app. Exit codes: 0 clean stop, 1 safety halt or runtime
/// failure, 2 configuration error.
pub async fn run(opts: RunOptions) -> i32 {
    let (frozen, mut cfg) = match config::load_and_validate(&opts.config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "configuration invalid");
            return 2;
        }
    };
    cfg.broker.paper_trading = opts.mode.is_paper();

    // An empty base_url resolves per mode; a configured one always wins.
    let base_url = if cfg.broker.base_url.is_empty() {
        match opts.mode {
            TradeMode::Paper => "https://paper-api.broker.example.com".to_string(),
            TradeMode::Live => "https://api.broker.example.com".to_string(),
        }
    } else {
        cfg.broker.base_url.clone()
    };

    let broker = Arc::new(crate::broker::HttpBrokerConnector::new(
        cfg.broker.api_key.clone(),
        cfg.broker.api_secret.clone(),
        base_url,
    ));

    let state_dir = PathBuf::from(std::env::var("STATE_DIR").unwrap_or_else(|_| "data/state".into()));
    let journal_dir =
        PathBuf::from(std::env::var("JOURNAL_DIR").unwrap_or_else(|_| "data/journal".into()));

    let container = match Container::build(
        &cfg,
        opts.mode,
        broker,
        Arc::new(SystemClock),
        &state_dir,
        &journal_dir,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "component wiring failed");
            return 1;
        }
    };

    let mut runtime = Runtime::new(container, cfg, &opts, frozen.hash().to_string());
    if let Err(code) = runtime.startup().await {
        return code;
    }

    // SIGINT/SIGTERM stop the loop at the end of the current cycle.
    let running = runtime.running_flag();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler install");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        warn!("shutdown signal received, stopping after current cycle");
        running.store(false, Ordering::SeqCst);
    });

    runtime.run_loop().await
}
