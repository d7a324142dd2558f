// =============================================================================
// Strategy lifecycle manager — start/stop and event routing
// =============================================================================
//
// Routes bars only to enabled strategies subscribed to the bar's symbol,
// normalizes their output, and routes order events back by strategy name.
// Purity is enforced at start time: a strategy declaring a forbidden handle
// never receives a single bar.
// =============================================================================

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::data::bar::Bar;
use crate::strategy::signals::Signal;
use crate::strategy::{check_broker_access, validate_signal_output, Strategy, StrategyPurityError};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("strategy '{0}' already exists")]
    Duplicate(String),

    #[error("strategy '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Purity(#[from] StrategyPurityError),
}

pub struct StrategyLifecycleManager {
    strategies: HashMap<String, Box<dyn Strategy>>,
    enabled: HashSet<String>,
    /// Insertion order, so bar routing is deterministic.
    order: Vec<String>,
}

impl StrategyLifecycleManager {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
            enabled: HashSet::new(),
            order: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Registration / lifecycle
    // -------------------------------------------------------------------------

    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) -> Result<(), LifecycleError> {
        let name = strategy.name().to_string();
        if self.strategies.contains_key(&name) {
            return Err(LifecycleError::Duplicate(name));
        }
        info!(strategy = %name, symbols = ?strategy.symbols(), "strategy added");
        self.order.push(name.clone());
        self.strategies.insert(name, strategy);
        Ok(())
    }

    /// Enforce purity, run `on_init`, and enable the strategy.
    pub fn start_strategy(&mut self, name: &str) -> Result<(), LifecycleError> {
        let strategy = self
            .strategies
            .get_mut(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_string()))?;

        check_broker_access(strategy.as_ref())?;

        strategy.on_init();
        self.enabled.insert(name.to_string());
        info!(strategy = name, "strategy started");
        Ok(())
    }

    pub fn stop_strategy(&mut self, name: &str) {
        if let Some(strategy) = self.strategies.get_mut(name) {
            strategy.on_stop();
            self.enabled.remove(name);
            info!(strategy = name, "strategy stopped");
        }
    }

    pub fn stop_all(&mut self) {
        let names: Vec<String> = self.enabled.iter().cloned().collect();
        for name in names {
            self.stop_strategy(&name);
        }
    }

    // -------------------------------------------------------------------------
    // Event routing
    // -------------------------------------------------------------------------

    /// Route a bar to every enabled, subscribed strategy. Returns the
    /// normalized signals; a malformed output aborts with a purity error.
    pub fn on_bar(&mut self, bar: &Bar) -> Result<Vec<Signal>, StrategyPurityError> {
        let mut out = Vec::new();

        for name in &self.order {
            if !self.enabled.contains(name) {
                continue;
            }
            let strategy = match self.strategies.get_mut(name) {
                Some(s) => s,
                None => continue,
            };
            if !strategy.symbols().iter().any(|s| s == &bar.symbol) {
                continue;
            }

            let output = strategy.on_bar(bar);
            let signals = validate_signal_output(output, name)?;
            for signal in &signals {
                info!(
                    strategy = %name,
                    symbol = %signal.symbol,
                    side = %signal.side,
                    quantity = %signal.quantity,
                    reason = %signal.reason,
                    "signal emitted"
                );
            }
            out.extend(signals);
        }
        Ok(out)
    }

    pub fn on_order_filled(
        &mut self,
        strategy_name: &str,
        order_id: &str,
        symbol: &str,
        filled_qty: Decimal,
        fill_price: Decimal,
    ) -> Option<Signal> {
        match self.strategies.get_mut(strategy_name) {
            Some(s) => s.on_order_filled(order_id, symbol, filled_qty, fill_price),
            None => {
                warn!(strategy = strategy_name, "fill callback for unknown strategy");
                None
            }
        }
    }

    pub fn on_order_rejected(
        &mut self,
        strategy_name: &str,
        order_id: &str,
        symbol: &str,
        reason: &str,
    ) -> Option<Signal> {
        self.strategies
            .get_mut(strategy_name)
            .and_then(|s| s.on_order_rejected(order_id, symbol, reason))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn enabled_strategies(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|n| self.enabled.contains(*n))
            .cloned()
            .collect()
    }

    pub fn all_symbols(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in &self.order {
            if !self.enabled.contains(name) {
                continue;
            }
            if let Some(strategy) = self.strategies.get(name) {
                for symbol in strategy.symbols() {
                    if seen.insert(symbol.clone()) {
                        out.push(symbol.clone());
                    }
                }
            }
        }
        out
    }
}

impl Default for StrategyLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
