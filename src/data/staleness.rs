// =============================================================================
// Staleness guard — age and completion gate for incoming bars
// =============================================================================
//
// Every bar handed to a strategy must first pass this guard. The guard is
// fail-closed: if the completion check itself cannot be computed, the bar is
// rejected rather than trusted.
//
// Decision order:
//   no bar            -> rejected (no_data)
//   completion errors -> rejected (completion_check_error)
//   incomplete        -> rejected (incomplete), only when completion required
//   age > threshold   -> rejected (stale); age == threshold passes
//   otherwise         -> passed
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::data::bar::{Bar, Timeframe};

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Why a bar was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessReason {
    Stale,
    Incomplete,
    NoData,
    CompletionCheckError,
}

impl std::fmt::Display for StalenessReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale => write!(f, "stale"),
            Self::Incomplete => write!(f, "incomplete"),
            Self::NoData => write!(f, "no_data"),
            Self::CompletionCheckError => write!(f, "completion_check_error"),
        }
    }
}

/// Immutable outcome of one staleness evaluation.
///
/// Always carries the symbol and a journal-ready event; rejections always
/// carry a reason.
#[derive(Debug, Clone)]
pub struct StalenessVerdict {
    pub ok: bool,
    pub symbol: String,
    pub reason: Option<StalenessReason>,
    pub event: serde_json::Value,
}

impl StalenessVerdict {
    fn passed(symbol: &str, age_seconds: i64, max_staleness_seconds: i64) -> Self {
        Self {
            ok: true,
            symbol: symbol.to_string(),
            reason: None,
            event: json!({
                "event": "staleness_pass",
                "symbol": symbol,
                "age_seconds": age_seconds,
                "max_staleness_seconds": max_staleness_seconds,
            }),
        }
    }

    fn rejected(symbol: &str, reason: StalenessReason, detail: serde_json::Value) -> Self {
        let mut event = json!({
            "event": "staleness_reject",
            "symbol": symbol,
            "reason": reason.to_string(),
        });
        if let (Some(obj), Some(extra)) = (event.as_object_mut(), detail.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        Self {
            ok: false,
            symbol: symbol.to_string(),
            reason: Some(reason),
            event,
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Configuration-driven staleness gate.
#[derive(Debug, Clone)]
pub struct StalenessGuard {
    /// Maximum acceptable bar age in seconds. Age equal to the threshold
    /// still passes; only strictly older bars are rejected.
    max_staleness_seconds: i64,
    /// Whether the bar window must have fully elapsed.
    require_complete: bool,
}

impl StalenessGuard {
    pub fn new(max_staleness_seconds: i64, require_complete: bool) -> Self {
        Self {
            max_staleness_seconds,
            require_complete,
        }
    }

    /// Evaluate a candidate bar against `reference` time.
    pub fn evaluate(
        &self,
        symbol: &str,
        bar: Option<&Bar>,
        timeframe: Timeframe,
        reference: DateTime<Utc>,
    ) -> StalenessVerdict {
        let bar = match bar {
            Some(b) => b,
            None => {
                warn!(symbol, "staleness guard: no bar available");
                return StalenessVerdict::rejected(symbol, StalenessReason::NoData, json!({}));
            }
        };

        match bar.is_complete_checked(timeframe, reference) {
            None => {
                warn!(symbol, bar_ts = %bar.timestamp, "staleness guard: completion check failed");
                return StalenessVerdict::rejected(
                    symbol,
                    StalenessReason::CompletionCheckError,
                    json!({ "bar_ts": bar.timestamp.to_rfc3339() }),
                );
            }
            Some(complete) => {
                if self.require_complete && !complete {
                    return StalenessVerdict::rejected(
                        symbol,
                        StalenessReason::Incomplete,
                        json!({
                            "bar_ts": bar.timestamp.to_rfc3339(),
                            "timeframe": timeframe.to_string(),
                        }),
                    );
                }
            }
        }

        let age = bar.age_seconds(reference);
        if age > self.max_staleness_seconds {
            return StalenessVerdict::rejected(
                symbol,
                StalenessReason::Stale,
                json!({
                    "age_seconds": age,
                    "max_staleness_seconds": self.max_staleness_seconds,
                }),
            );
        }

        StalenessVerdict::passed(symbol, age, self.max_staleness_seconds)
    }
}
