// =============================================================================
// Config validator — strict-mode schema discipline
// =============================================================================
//
// Guarantees:
//   1. Unknown keys are rejected (strict mode): top level, within each
//      section, and within each strategy entry.
//   2. ALL errors come back at once, never just the first.
//   3. Every error carries a dotted path (risk.unknown_limit,
//      strategies[0].foo) and a machine-readable error type.
// =============================================================================

use serde_json::Value;

use crate::config::schema::{
    AppConfig, BrokerConfig, DataConfig, LoggingConfig, RiskConfig, SessionConfig, StrategyEntry,
};
use crate::data::bar::Timeframe;
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Error model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorType {
    ExtraKey,
    Missing,
    TypeError,
    ValueError,
}

impl std::fmt::Display for ConfigErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExtraKey => write!(f, "extra_key"),
            Self::Missing => write!(f, "missing"),
            Self::TypeError => write!(f, "type_error"),
            Self::ValueError => write!(f, "value_error"),
        }
    }
}

/// One validation error with location and message.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub path: String,
    pub message: String,
    pub error_type: ConfigErrorType,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.error_type, self.path, self.message)
    }
}

/// Complete result of config validation. `ok == true` means zero errors.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub ok: bool,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn summary(&self) -> String {
        if self.ok {
            return "Config OK (0 errors)".to_string();
        }
        let mut lines = vec![format!("Config INVALID ({} errors):", self.errors.len())];
        for e in &self.errors {
            lines.push(format!("  - {e}"));
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Known key sets (extra-key detection)
// ---------------------------------------------------------------------------

const KNOWN_TOP_KEYS: &[&str] = &[
    "risk",
    "broker",
    "data",
    "strategies",
    "session",
    "logging",
    "position_db_path",
    "transaction_log_path",
    "limit_tracker_path",
];

const KNOWN_RISK_KEYS: &[&str] = &[
    "initial_account_value",
    "max_open_positions",
    "max_position_size_pct",
    "max_position_value_usd",
    "daily_loss_limit_usd",
    "weekly_loss_limit_usd",
    "risk_per_trade_pct",
    "min_buying_power_reserve",
    "circuit_breaker_enabled",
    "circuit_breaker_loss_pct",
    "halt_duration_minutes",
];

const KNOWN_BROKER_KEYS: &[&str] = &["name", "api_key", "api_secret", "base_url", "paper_trading"];

const KNOWN_DATA_KEYS: &[&str] = &[
    "primary_provider",
    "fallback_providers",
    "max_staleness_seconds",
    "cache_enabled",
    "cache_dir",
];

const KNOWN_SESSION_KEYS: &[&str] = &[
    "cycle_interval_seconds",
    "max_daily_trades",
    "trading_hours_only",
    "startup_recovery_enabled",
];

const KNOWN_LOGGING_KEYS: &[&str] = &[
    "log_dir",
    "log_level",
    "console_level",
    "json_logs",
    "max_bytes",
    "backup_count",
];

const KNOWN_STRATEGY_KEYS: &[&str] = &[
    "name",
    "enabled",
    "symbols",
    "timeframe",
    "lookback_bars",
    "parameters",
];

const SECTION_KEYS: &[(&str, &[&str])] = &[
    ("risk", KNOWN_RISK_KEYS),
    ("broker", KNOWN_BROKER_KEYS),
    ("data", KNOWN_DATA_KEYS),
    ("session", KNOWN_SESSION_KEYS),
    ("logging", KNOWN_LOGGING_KEYS),
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect unknown keys at top level, in sections, and per strategy entry.
pub fn find_extra_keys(raw: &Value) -> Vec<ConfigError> {
    let mut errors = Vec::new();
    let Some(top) = raw.as_object() else {
        return errors;
    };

    for key in top.keys() {
        if !KNOWN_TOP_KEYS.contains(&key.as_str()) {
            errors.push(ConfigError {
                path: key.clone(),
                message: format!("unknown top-level key '{key}'"),
                error_type: ConfigErrorType::ExtraKey,
            });
        }
    }

    for (section, known) in SECTION_KEYS {
        if let Some(sub) = top.get(*section).and_then(Value::as_object) {
            for key in sub.keys() {
                if !known.contains(&key.as_str()) {
                    errors.push(ConfigError {
                        path: format!("{section}.{key}"),
                        message: format!("unknown key '{key}' in '{section}'"),
                        error_type: ConfigErrorType::ExtraKey,
                    });
                }
            }
        }
    }

    if let Some(strategies) = top.get("strategies").and_then(Value::as_array) {
        for (i, strat) in strategies.iter().enumerate() {
            if let Some(obj) = strat.as_object() {
                for key in obj.keys() {
                    if !KNOWN_STRATEGY_KEYS.contains(&key.as_str()) {
                        errors.push(ConfigError {
                            path: format!("strategies[{i}].{key}"),
                            message: format!("unknown key '{key}' in strategy #{i}"),
                            error_type: ConfigErrorType::ExtraKey,
                        });
                    }
                }
            }
        }
    }

    errors
}

/// Validate a raw config value. Strict mode makes unknown keys errors.
pub fn validate_config(raw: &Value, strict: bool) -> ValidationResult {
    let mut errors = Vec::new();
    let warnings = Vec::new();

    if !raw.is_object() {
        return ValidationResult {
            ok: false,
            errors: vec![ConfigError {
                path: "<root>".into(),
                message: "config must be a mapping".into(),
                error_type: ConfigErrorType::TypeError,
            }],
            warnings,
        };
    }

    if strict {
        errors.extend(find_extra_keys(raw));
    }

    // Per-section typed deserialization, so one bad section does not mask
    // errors in another.
    check_section::<RiskConfig>(raw, "risk", &mut errors);
    check_section::<BrokerConfig>(raw, "broker", &mut errors);
    check_section::<DataConfig>(raw, "data", &mut errors);
    check_section::<SessionConfig>(raw, "session", &mut errors);
    check_section::<LoggingConfig>(raw, "logging", &mut errors);
    check_strategies(raw, &mut errors);

    // Range checks run on whatever deserialized cleanly.
    if let Ok(cfg) = serde_json::from_value::<AppConfig>(raw.clone()) {
        check_ranges(&cfg, &mut errors);
    }

    ValidationResult {
        ok: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_section<T: serde::de::DeserializeOwned>(
    raw: &Value,
    section: &str,
    errors: &mut Vec<ConfigError>,
) {
    let Some(value) = raw.get(section) else {
        return; // absent sections use defaults
    };
    if !value.is_object() {
        errors.push(ConfigError {
            path: section.to_string(),
            message: "section must be a mapping".into(),
            error_type: ConfigErrorType::TypeError,
        });
        return;
    }
    if let Err(e) = serde_json::from_value::<T>(value.clone()) {
        errors.push(ConfigError {
            path: section.to_string(),
            message: e.to_string(),
            error_type: ConfigErrorType::TypeError,
        });
    }
}

fn check_strategies(raw: &Value, errors: &mut Vec<ConfigError>) {
    let Some(value) = raw.get("strategies") else {
        return;
    };
    let Some(list) = value.as_array() else {
        errors.push(ConfigError {
            path: "strategies".into(),
            message: "must be a list".into(),
            error_type: ConfigErrorType::TypeError,
        });
        return;
    };

    for (i, entry) in list.iter().enumerate() {
        match serde_json::from_value::<StrategyEntry>(entry.clone()) {
            Err(e) => errors.push(ConfigError {
                path: format!("strategies[{i}]"),
                message: e.to_string(),
                error_type: if e.to_string().contains("missing field") {
                    ConfigErrorType::Missing
                } else {
                    ConfigErrorType::TypeError
                },
            }),
            Ok(strategy) => {
                if strategy.name.trim().is_empty() {
                    errors.push(ConfigError {
                        path: format!("strategies[{i}].name"),
                        message: "strategy name must not be empty".into(),
                        error_type: ConfigErrorType::ValueError,
                    });
                }
                if Timeframe::parse(&strategy.timeframe).is_none() {
                    errors.push(ConfigError {
                        path: format!("strategies[{i}].timeframe"),
                        message: format!("unsupported timeframe '{}'", strategy.timeframe),
                        error_type: ConfigErrorType::ValueError,
                    });
                }
            }
        }
    }
}

fn check_ranges(cfg: &AppConfig, errors: &mut Vec<ConfigError>) {
    let mut value_error = |path: &str, message: String| {
        errors.push(ConfigError {
            path: path.to_string(),
            message,
            error_type: ConfigErrorType::ValueError,
        });
    };

    if cfg.session.cycle_interval_seconds < 1 {
        value_error(
            "session.cycle_interval_seconds",
            "must be at least 1 second".into(),
        );
    }
    if cfg.data.max_staleness_seconds <= 0 {
        value_error("data.max_staleness_seconds", "must be positive".into());
    }
    if cfg.risk.max_position_size_pct <= Decimal::ZERO || cfg.risk.max_position_size_pct > Decimal::ONE {
        value_error(
            "risk.max_position_size_pct",
            format!(
                "must be in (0, 1], got {}",
                cfg.risk.max_position_size_pct
            ),
        );
    }
    if cfg.risk.max_position_value_usd <= Decimal::ZERO {
        value_error("risk.max_position_value_usd", "must be positive".into());
    }
    if cfg.risk.daily_loss_limit_usd < Decimal::ZERO {
        value_error("risk.daily_loss_limit_usd", "must not be negative".into());
    }
    if cfg.risk.max_open_positions == 0 {
        value_error("risk.max_open_positions", "must be at least 1".into());
    }
}
