// =============================================================================
// Configuration — YAML loading, strict validation, freeze-with-hash
// =============================================================================
//
// Pipeline: load YAML + env overrides -> strict validation (ALL errors at
// once, dotted paths) -> typed AppConfig + immutable FrozenConfig with a
// SHA-256 integrity hash.
// =============================================================================

pub mod frozen;
pub mod loader;
pub mod schema;
pub mod validator;

use std::path::Path;

use anyhow::{bail, Context, Result};

pub use frozen::FrozenConfig;
pub use loader::{apply_env_overrides, load_raw, scrub_secrets};
pub use schema::{
    AppConfig, BrokerConfig, DataConfig, LoggingConfig, RiskConfig, SessionConfig, StrategyEntry,
};
pub use validator::{validate_config, ConfigError, ConfigErrorType, ValidationResult};

/// Load, validate (strict), and freeze a config file.
///
/// Returns the frozen raw config and the typed view. Any validation error
/// fails the load with the full multi-error report in the message.
pub fn load_and_validate(path: &Path) -> Result<(FrozenConfig, AppConfig)> {
    let raw = load_raw(path)?;

    let result = validate_config(&raw, true);
    if !result.ok {
        bail!("{}", result.summary());
    }

    let typed: AppConfig =
        serde_json::from_value(raw.clone()).context("config failed typed deserialization")?;
    Ok((FrozenConfig::new(raw), typed))
}
