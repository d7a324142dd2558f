// =============================================================================
// Strategy registry — name → factory map
// =============================================================================
//
// Strategies are instantiated from validated config entries. Duplicate
// registrations are rejected; unknown names fail fast at startup.
// =============================================================================

use std::collections::HashMap;

use thiserror::Error;
use tracing::info;

use crate::data::bar::Timeframe;
use crate::strategy::Strategy;

/// Everything a factory needs to build one strategy instance.
#[derive(Debug, Clone)]
pub struct StrategySpec {
    pub name: String,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub parameters: serde_json::Value,
}

type Factory = Box<dyn Fn(&StrategySpec) -> Box<dyn Strategy> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("strategy '{0}' is already registered")]
    Duplicate(String),

    #[error("unknown strategy '{0}'")]
    Unknown(String),
}

pub struct StrategyRegistry {
    factories: HashMap<String, Factory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: &str,
        factory: impl Fn(&StrategySpec) -> Box<dyn Strategy> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        if self.factories.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        info!(strategy = name, "strategy registered");
        self.factories.insert(name.to_string(), Box::new(factory));
        Ok(())
    }

    pub fn create(&self, spec: &StrategySpec) -> Result<Box<dyn Strategy>, RegistryError> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| RegistryError::Unknown(spec.name.clone()))?;
        Ok(factory(spec))
    }

    pub fn known_strategies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register the built-in strategies.
pub fn bootstrap(registry: &mut StrategyRegistry) -> Result<(), RegistryError> {
    registry.register("vwap_micro_mean_reversion", |spec| {
        Box::new(crate::strategy::vwap_micro::VwapMicroMeanReversion::from_spec(spec))
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str) -> StrategySpec {
        StrategySpec {
            name: name.into(),
            symbols: vec!["SPY".into()],
            timeframe: Timeframe::Min1,
            parameters: json!({}),
        }
    }

    #[test]
    fn bootstrap_registers_builtins() {
        let mut registry = StrategyRegistry::new();
        bootstrap(&mut registry).unwrap();
        assert_eq!(registry.known_strategies(), vec!["vwap_micro_mean_reversion"]);

        let strategy = registry.create(&spec("vwap_micro_mean_reversion")).unwrap();
        assert_eq!(strategy.name(), "vwap_micro_mean_reversion");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = StrategyRegistry::new();
        bootstrap(&mut registry).unwrap();
        assert!(matches!(
            bootstrap(&mut registry),
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[test]
    fn unknown_strategy_fails_fast() {
        let registry = StrategyRegistry::new();
        assert!(matches!(
            registry.create(&spec("nope")),
            Err(RegistryError::Unknown(_))
        ));
    }
}
