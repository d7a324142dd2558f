// =============================================================================
// Bar — canonical OHLCV record shared by every data source and strategy
// =============================================================================
//
// All prices are exact decimals. A bar is immutable once constructed and is
// validated at construction time: no strategy ever sees a bar with an
// inverted high/low or a non-positive price.
//
// Anti-lookahead: callers must check `is_complete()` before acting on the
// close of the most recent bar.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grace period added to the bar window before it counts as complete.
/// Providers often deliver the final tick of a bar a few seconds late.
const COMPLETION_GRACE_SECONDS: i64 = 5;

// ---------------------------------------------------------------------------
// Timeframe
// ---------------------------------------------------------------------------

/// Bar timeframe understood by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Min1,
    Min5,
    Min15,
    Hour1,
    Day1,
}

impl Timeframe {
    /// Parse provider-style timeframe labels ("1Min", "5Min", "1Hour", "1Day").
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1min" | "1m" => Some(Self::Min1),
            "5min" | "5m" => Some(Self::Min5),
            "15min" | "15m" => Some(Self::Min15),
            "1hour" | "1h" | "60min" => Some(Self::Hour1),
            "1day" | "1d" => Some(Self::Day1),
            _ => None,
        }
    }

    /// Window length of one bar of this timeframe.
    pub fn duration(self) -> Duration {
        match self {
            Self::Min1 => Duration::minutes(1),
            Self::Min5 => Duration::minutes(5),
            Self::Min15 => Duration::minutes(15),
            Self::Hour1 => Duration::hours(1),
            Self::Day1 => Duration::days(1),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Min1 => write!(f, "1Min"),
            Self::Min5 => write!(f, "5Min"),
            Self::Min15 => write!(f, "15Min"),
            Self::Hour1 => write!(f, "1Hour"),
            Self::Day1 => write!(f, "1Day"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarError {
    #[error("{symbol}: non-positive price in bar (o={open} h={high} l={low} c={close})")]
    NonPositivePrice {
        symbol: String,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    },

    #[error("{symbol}: OHLC relationship violated (low={low} high={high} open={open} close={close})")]
    OhlcViolation {
        symbol: String,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    },

    #[error("{symbol}: empty symbol or provider field")]
    MissingField { symbol: String },
}

// ---------------------------------------------------------------------------
// Bar
// ---------------------------------------------------------------------------

/// One OHLCV record for a symbol over a timeframe window.
///
/// The `timestamp` marks the *start* of the bar window, UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Missing for sources that do not report volume.
    pub volume: Option<u64>,
    pub provider: String,
}

impl Bar {
    /// Construct a validated bar.
    ///
    /// Enforces `low <= {open, close} <= high` and strictly positive prices.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Option<u64>,
        provider: impl Into<String>,
    ) -> Result<Self, BarError> {
        let symbol = symbol.into().to_uppercase();
        let provider = provider.into();

        if symbol.is_empty() || provider.is_empty() {
            return Err(BarError::MissingField { symbol });
        }

        if open <= Decimal::ZERO || high <= Decimal::ZERO || low <= Decimal::ZERO || close <= Decimal::ZERO {
            return Err(BarError::NonPositivePrice { symbol, open, high, low, close });
        }

        if low > open || low > close || high < open || high < close || low > high {
            return Err(BarError::OhlcViolation { symbol, open, high, low, close });
        }

        Ok(Self {
            symbol,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            provider,
        })
    }

    /// Age of the bar relative to `reference`, in whole seconds.
    ///
    /// Negative when the bar timestamp lies in the future of `reference`.
    pub fn age_seconds(&self, reference: DateTime<Utc>) -> i64 {
        (reference - self.timestamp).num_seconds()
    }

    /// Whether this bar's window has fully elapsed at `reference`.
    ///
    /// A bar is complete when `reference > timestamp + timeframe + grace`.
    pub fn is_complete(&self, timeframe: Timeframe, reference: DateTime<Utc>) -> bool {
        self.is_complete_checked(timeframe, reference).unwrap_or(false)
    }

    /// Completion check that surfaces arithmetic failure instead of guessing.
    ///
    /// Returns `None` when the window end cannot be computed (timestamp
    /// overflow); the staleness guard treats that as a rejection.
    pub fn is_complete_checked(&self, timeframe: Timeframe, reference: DateTime<Utc>) -> Option<bool> {
        let window_end = self
            .timestamp
            .checked_add_signed(timeframe.duration())?
            .checked_add_signed(Duration::seconds(COMPLETION_GRACE_SECONDS))?;
        Some(reference > window_end)
    }
}
