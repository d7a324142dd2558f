// =============================================================================
// Config schema — the single source of truth for configuration shape
// =============================================================================
//
// Every field carries a serde default so older config files keep loading
// when new fields appear. Validation beyond shape (ranges, unknown keys)
// lives in the validator.
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

fn default_max_open_positions() -> u32 {
    3
}

fn default_max_position_size_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_daily_loss_limit_usd() -> Decimal {
    Decimal::from(25)
}

fn default_max_position_value_usd() -> Decimal {
    Decimal::from(1_000)
}

/// Risk limits and caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub initial_account_value: Option<Decimal>,
    pub max_open_positions: u32,
    /// Single-position cap as a fraction of portfolio value.
    pub max_position_size_pct: Decimal,
    /// Single-position cap in dollars.
    pub max_position_value_usd: Decimal,
    pub daily_loss_limit_usd: Decimal,
    pub weekly_loss_limit_usd: Option<Decimal>,
    pub risk_per_trade_pct: Option<Decimal>,
    /// Buying power that must stay untouched after every BUY.
    pub min_buying_power_reserve: Decimal,
    pub circuit_breaker_enabled: bool,
    pub circuit_breaker_loss_pct: Option<Decimal>,
    pub halt_duration_minutes: Option<u32>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_account_value: None,
            max_open_positions: default_max_open_positions(),
            max_position_size_pct: default_max_position_size_pct(),
            max_position_value_usd: default_max_position_value_usd(),
            daily_loss_limit_usd: default_daily_loss_limit_usd(),
            weekly_loss_limit_usd: None,
            risk_per_trade_pct: None,
            min_buying_power_reserve: Decimal::ZERO,
            circuit_breaker_enabled: true,
            circuit_breaker_loss_pct: None,
            halt_duration_minutes: None,
        }
    }
}

fn default_broker_name() -> String {
    "alpaca".to_string()
}

/// Broker connection settings. Credentials are normally injected from the
/// environment; values here are fallbacks for development. An empty
/// `base_url` resolves to the mode's default endpoint at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub paper_trading: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            name: default_broker_name(),
            api_key: String::new(),
            api_secret: String::new(),
            base_url: String::new(),
            paper_trading: true,
        }
    }
}

fn default_max_staleness_seconds() -> i64 {
    120
}

/// Market-data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub primary_provider: String,
    pub fallback_providers: Vec<String>,
    pub max_staleness_seconds: i64,
    pub cache_enabled: bool,
    pub cache_dir: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            primary_provider: "broker".to_string(),
            fallback_providers: Vec::new(),
            max_staleness_seconds: default_max_staleness_seconds(),
            cache_enabled: true,
            cache_dir: None,
        }
    }
}

fn default_cycle_interval_seconds() -> u64 {
    60
}

/// Trading-session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cycle_interval_seconds: u64,
    pub max_daily_trades: u32,
    pub trading_hours_only: bool,
    pub startup_recovery_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cycle_interval_seconds: default_cycle_interval_seconds(),
            max_daily_trades: 50,
            trading_hours_only: true,
            startup_recovery_enabled: true,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: Option<String>,
    pub log_level: String,
    pub console_level: Option<String>,
    pub json_logs: bool,
    pub max_bytes: Option<u64>,
    pub backup_count: Option<u32>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            console_level: None,
            json_logs: false,
            max_bytes: None,
            backup_count: None,
        }
    }
}

fn default_timeframe() -> String {
    "1Min".to_string()
}

fn default_lookback_bars() -> u32 {
    120
}

/// One configured strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_lookback_bars")]
    pub lookback_bars: u32,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Validated application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub risk: RiskConfig,
    pub broker: BrokerConfig,
    pub data: DataConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub strategies: Vec<StrategyEntry>,
    pub position_db_path: Option<String>,
    pub transaction_log_path: Option<String>,
    pub limit_tracker_path: Option<String>,
}
