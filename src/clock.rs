// =============================================================================
// Clocks — injectable wall clock and the cached broker market clock
// =============================================================================
//
// SAFETY POLICY: when the broker clock cannot be fetched, the market is
// treated as CLOSED (fail-closed). Operators can opt into fail-open with
// MQD_FAIL_OPEN_MARKET_HOURS=1 for venues where a stuck clock endpoint
// would otherwise idle the whole session.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::broker::{BrokerApi, BrokerClockInfo};

/// Environment variable enabling fail-open market-hours behavior.
pub const FAIL_OPEN_ENV: &str = "MQD_FAIL_OPEN_MARKET_HOURS";

// ---------------------------------------------------------------------------
// Wall clock
// ---------------------------------------------------------------------------

/// Injectable source of "now". Production uses [`SystemClock`]; tests use a
/// settable fixed clock.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// Market clock
// ---------------------------------------------------------------------------

/// One market-hours answer handed to the runtime.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub is_open: bool,
    pub next_open: Option<DateTime<Utc>>,
    pub next_close: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CachedClock {
    fetched_at: DateTime<Utc>,
    info: BrokerClockInfo,
}

/// Broker market clock with a TTL cache.
///
/// The cache is additionally invalidated whenever `now` crosses the cached
/// `next_open` or `next_close` boundary, so an open/close transition is
/// always observed with a fresh fetch.
pub struct MarketClock {
    broker: Arc<dyn BrokerApi>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
    fail_open: bool,
    cached: Mutex<Option<CachedClock>>,
}

impl MarketClock {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        clock: Arc<dyn Clock>,
        cache_ttl: Duration,
        fail_open: bool,
    ) -> Self {
        Self {
            broker,
            clock,
            cache_ttl,
            fail_open,
            cached: Mutex::new(None),
        }
    }

    /// Read the fail-open override from the environment.
    pub fn fail_open_from_env() -> bool {
        matches!(
            std::env::var(FAIL_OPEN_ENV).ok().as_deref(),
            Some("1") | Some("true") | Some("yes")
        )
    }

    /// Current market-hours snapshot, served from cache when still valid.
    pub async fn snapshot(&self) -> MarketSnapshot {
        let now = self.clock.now_utc();

        if let Some(cached) = self.cached.lock().clone() {
            if !self.is_expired(&cached, now) {
                return Self::to_snapshot(&cached.info);
            }
        }

        match self.broker.get_clock().await {
            Ok(info) => {
                debug!(
                    is_open = info.is_open,
                    next_open = ?info.next_open,
                    next_close = ?info.next_close,
                    "market clock refreshed"
                );
                let snapshot = Self::to_snapshot(&info);
                *self.cached.lock() = Some(CachedClock {
                    fetched_at: now,
                    info,
                });
                snapshot
            }
            Err(e) => {
                // No cached truth and no fresh answer. Closed unless the
                // operator explicitly opted into fail-open.
                warn!(error = %e, fail_open = self.fail_open, "market clock fetch failed");
                MarketSnapshot {
                    is_open: self.fail_open,
                    next_open: None,
                    next_close: None,
                }
            }
        }
    }

    fn is_expired(&self, cached: &CachedClock, now: DateTime<Utc>) -> bool {
        if now >= cached.fetched_at + self.cache_ttl {
            return true;
        }
        if let Some(next_open) = cached.info.next_open {
            if now >= next_open {
                return true;
            }
        }
        if let Some(next_close) = cached.info.next_close {
            if now >= next_close {
                return true;
            }
        }
        false
    }

    fn to_snapshot(info: &BrokerClockInfo) -> MarketSnapshot {
        MarketSnapshot {
            is_open: info.is_open,
            next_open: info.next_open,
            next_close: info.next_close,
        }
    }
}
