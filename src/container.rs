// =============================================================================
// Container — fixed-order dependency wiring for the runtime
// =============================================================================
//
// Components are built leaves-first: clock, persistence, event bus, state
// machine, tracker, guards, risk, protections, execution engine, recovery.
// Strategies live only in the lifecycle manager (name → handle); nothing
// holds a back-reference to the container.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;

use crate::broker::BrokerApi;
use crate::clock::{Clock, MarketClock};
use crate::config::AppConfig;
use crate::data::provider::{BarProvider, BrokerBarProvider};
use crate::data::staleness::StalenessGuard;
use crate::events::{EventBus, JournalSink, LogSink};
use crate::execution::engine::ExecutionEngine;
use crate::execution::symbols::SymbolPropertiesCache;
use crate::gates::cooldown::CooldownGate;
use crate::gates::single_trade::SingleTradeGuard;
use crate::journal::JournalWriter;
use crate::orders::machine::OrderStateMachine;
use crate::orders::tracker::OrderTracker;
use crate::protections::{
    CooldownPeriod, DrawdownProtection, ProtectionManager, StoplossGuard, TimeWindowProtection,
    VolatilityHalt,
};
use crate::reconcile::Reconciler;
use crate::recovery::RecoveryCoordinator;
use crate::risk::manager::{RiskManager, RiskManagerParams};
use crate::runtime::circuit_breaker::ConsecutiveFailureBreaker;
use crate::state::limits::LimitsTracker;
use crate::state::position_store::PositionStore;
use crate::state::stops::StopLifecycleManager;
use crate::state::transaction_log::TransactionLog;
use crate::strategy::lifecycle::StrategyLifecycleManager;
use crate::strategy::registry::{self, StrategyRegistry};
use crate::types::TradeMode;

/// Seconds a broker clock answer stays fresh (boundary crossings always
/// invalidate earlier).
const MARKET_CLOCK_TTL_SECONDS: i64 = 60;

/// Seconds a fetched bar series may be reused within a cycle.
const BAR_CACHE_FRESHNESS_SECONDS: i64 = 5;

/// Signal cooldown default, overridable via SIGNAL_COOLDOWN_SECONDS.
const DEFAULT_SIGNAL_COOLDOWN_SECONDS: i64 = 30;

/// The full component graph handed to the runtime.
pub struct Container {
    pub clock: Arc<dyn Clock>,
    pub broker: Arc<dyn BrokerApi>,
    pub market_clock: MarketClock,
    pub journal: Arc<JournalWriter>,
    pub bus: Arc<EventBus>,
    pub txlog: Arc<TransactionLog>,
    pub machine: Arc<OrderStateMachine>,
    pub tracker: Arc<OrderTracker>,
    pub positions: Arc<PositionStore>,
    pub limits: Arc<LimitsTracker>,
    pub stops: StopLifecycleManager,
    pub staleness: StalenessGuard,
    pub provider: Arc<dyn BarProvider>,
    pub cooldown: CooldownGate,
    pub single_trade: SingleTradeGuard,
    pub protections: ProtectionManager,
    pub risk: RiskManager,
    pub engine: Arc<ExecutionEngine>,
    pub registry: StrategyRegistry,
    pub lifecycle: StrategyLifecycleManager,
    pub recovery: RecoveryCoordinator,
    pub reconciler: Reconciler,
    pub breaker: ConsecutiveFailureBreaker,
}

impl Container {
    /// Build the component graph in dependency order.
    pub fn build(
        cfg: &AppConfig,
        mode: TradeMode,
        broker: Arc<dyn BrokerApi>,
        clock: Arc<dyn Clock>,
        state_dir: &Path,
        journal_dir: &Path,
    ) -> Result<Self> {
        // ---- clocks --------------------------------------------------------
        let market_clock = MarketClock::new(
            broker.clone(),
            clock.clone(),
            Duration::seconds(MARKET_CLOCK_TTL_SECONDS),
            MarketClock::fail_open_from_env(),
        );

        // ---- journal + event bus ------------------------------------------
        let journal = Arc::new(JournalWriter::new(journal_dir).context("journal init failed")?);
        let bus = Arc::new(EventBus::new());
        bus.subscribe(Arc::new(JournalSink::new(journal.clone())));
        bus.subscribe(Arc::new(LogSink));

        // ---- persistence ---------------------------------------------------
        let txlog_path = cfg
            .transaction_log_path
            .as_ref()
            .map(|p| p.into())
            .unwrap_or_else(|| state_dir.join("transactions.jsonl"));
        let txlog = Arc::new(TransactionLog::open(txlog_path).context("transaction log init failed")?);

        let positions_path = cfg
            .position_db_path
            .as_ref()
            .map(|p| p.into())
            .unwrap_or_else(|| state_dir.join("positions.json"));
        let positions =
            Arc::new(PositionStore::open(positions_path).context("position store init failed")?);

        let limits_path = cfg
            .limit_tracker_path
            .as_ref()
            .map(|p| p.into())
            .unwrap_or_else(|| state_dir.join("limits.json"));
        let limits = Arc::new(
            LimitsTracker::open(limits_path, clock.clone(), cfg.risk.daily_loss_limit_usd)
                .context("limits tracker init failed")?,
        );

        let stops = StopLifecycleManager::new();

        // ---- orders --------------------------------------------------------
        let machine = Arc::new(OrderStateMachine::new(
            txlog.clone(),
            bus.clone(),
            clock.clone(),
        ));
        let tracker = Arc::new(OrderTracker::new());

        // ---- data ----------------------------------------------------------
        let staleness = StalenessGuard::new(
            cfg.data.max_staleness_seconds,
            // Incomplete bars are acceptable in paper smoke runs; live
            // requires completion (anti-lookahead).
            mode == TradeMode::Live,
        );
        let provider: Arc<dyn BarProvider> = Arc::new(BrokerBarProvider::new(
            broker.clone(),
            clock.clone(),
            BAR_CACHE_FRESHNESS_SECONDS,
        ));

        // ---- gates ---------------------------------------------------------
        let cooldown_seconds = std::env::var("SIGNAL_COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SIGNAL_COOLDOWN_SECONDS);
        let cooldown = CooldownGate::new(cooldown_seconds);
        // Paper fails open on guard uncertainty, live blocks.
        let single_trade = SingleTradeGuard::new(mode == TradeMode::Live);

        // ---- protections (evaluation order is registration order) ---------
        let mut protections = ProtectionManager::new(clock.clone());
        protections.register(Box::new(
            TimeWindowProtection::from_strings("09:30", "15:55")
                .expect("static window parses"),
        ));
        protections.register(Box::new(VolatilityHalt::new(20, Decimal::new(2, 2))));
        protections.register(Box::new(StoplossGuard::new(3, 60)));
        protections.register(Box::new(DrawdownProtection::new(Decimal::new(5, 2))));
        protections.register(Box::new(CooldownPeriod::new(15)));

        // ---- risk ----------------------------------------------------------
        let risk = RiskManager::new(
            RiskManagerParams {
                max_position_value_usd: cfg.risk.max_position_value_usd,
                max_position_pct: cfg.risk.max_position_size_pct,
                max_open_positions: cfg.risk.max_open_positions,
                min_buying_power_reserve: cfg.risk.min_buying_power_reserve,
                max_daily_trades: cfg.session.max_daily_trades,
                ..RiskManagerParams::default()
            },
            limits.clone(),
            positions.clone(),
        );

        // ---- execution -----------------------------------------------------
        let symbols = Arc::new(SymbolPropertiesCache::new(broker.clone()));
        let engine = Arc::new(
            ExecutionEngine::new(
                broker.clone(),
                machine.clone(),
                tracker.clone(),
                positions.clone(),
                txlog.clone(),
                symbols,
                clock.clone(),
            )
            .context("execution engine init failed")?,
        );

        // ---- strategies ----------------------------------------------------
        let mut strategy_registry = StrategyRegistry::new();
        registry::bootstrap(&mut strategy_registry).context("strategy bootstrap failed")?;
        let lifecycle = StrategyLifecycleManager::new();

        // ---- recovery / reconciliation ------------------------------------
        let recovery =
            RecoveryCoordinator::new(broker.clone(), positions.clone(), clock.clone(), mode);
        let reconciler = Reconciler::new(broker.clone(), positions.clone(), clock.clone());

        let max_failures = std::env::var("MAX_CONSECUTIVE_FAILURES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let breaker = ConsecutiveFailureBreaker::new(max_failures);

        Ok(Self {
            clock,
            broker,
            market_clock,
            journal,
            bus,
            txlog,
            machine,
            tracker,
            positions,
            limits,
            stops,
            staleness,
            provider,
            cooldown,
            single_trade,
            protections,
            risk,
            engine,
            registry: strategy_registry,
            lifecycle,
            recovery,
            reconciler,
            breaker,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::testing::MockBroker;

    #[test]
    fn builds_full_graph_from_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::default();
        let container = Container::build(
            &cfg,
            TradeMode::Paper,
            Arc::new(MockBroker::new()),
            Arc::new(SystemClock),
            &dir.path().join("state"),
            &dir.path().join("journal"),
        )
        .unwrap();

        assert_eq!(container.protections.count(), 5);
        assert_eq!(
            container.protections.names(),
            vec![
                "time_window",
                "volatility_halt",
                "stoploss_guard",
                "max_drawdown",
                "cooldown_period"
            ]
        );
        assert_eq!(container.bus.sink_count(), 2);
        assert_eq!(
            container.registry.known_strategies(),
            vec!["vwap_micro_mean_reversion"]
        );
    }

    #[test]
    fn explicit_state_paths_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        let tx = dir.path().join("custom/tx.jsonl");
        cfg.transaction_log_path = Some(tx.to_string_lossy().into_owned());

        let container = Container::build(
            &cfg,
            TradeMode::Paper,
            Arc::new(MockBroker::new()),
            Arc::new(SystemClock),
            &dir.path().join("state"),
            &dir.path().join("journal"),
        )
        .unwrap();

        assert_eq!(container.txlog.path(), tx.as_path());
    }
}
