// =============================================================================
// Limits tracker — per-trading-day realized PnL and loss limit
// =============================================================================
//
// The trading day is the America/New_York calendar date: the loss limit is
// a per-session control and the venue clock is Eastern, so a UTC rollover
// would split one session across two "days" after 19:00 ET.
//
// State persists across restarts (atomic tmp + rename); the daily reset
// happens only when the New York date actually changes. Restarting the
// process therefore cannot clear a breached loss limit.
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::America::New_York;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;

#[derive(Debug, Error)]
pub enum LimitsError {
    #[error("limits tracker I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("limits tracker serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DayState {
    trading_day: NaiveDate,
    realized_pnl: Decimal,
    trades_today: u32,
    day_trades_today: u32,
    loss_limit_breached: bool,
}

impl DayState {
    fn fresh(day: NaiveDate) -> Self {
        Self {
            trading_day: day,
            realized_pnl: Decimal::ZERO,
            trades_today: 0,
            day_trades_today: 0,
            loss_limit_breached: false,
        }
    }
}

/// Daily realized-PnL and trade counters with a durable loss-limit flag.
pub struct LimitsTracker {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    daily_loss_limit_usd: Decimal,
    state: RwLock<DayState>,
}

impl LimitsTracker {
    pub fn open(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        daily_loss_limit_usd: Decimal,
    ) -> Result<Self, LimitsError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LimitsError::Io {
                path: path.clone(),
                source: e,
            })?;
        }

        let today = Self::trading_day(&clock);
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| LimitsError::Io {
                path: path.clone(),
                source: e,
            })?;
            match serde_json::from_str::<DayState>(&content) {
                Ok(persisted) if persisted.trading_day == today => persisted,
                Ok(stale) => {
                    info!(
                        old_day = %stale.trading_day,
                        new_day = %today,
                        "trading day rolled since last run, resetting daily limits"
                    );
                    DayState::fresh(today)
                }
                Err(e) => {
                    warn!(error = %e, "limits state unreadable, starting fresh");
                    DayState::fresh(today)
                }
            }
        } else {
            DayState::fresh(today)
        };

        info!(
            day = %state.trading_day,
            realized_pnl = %state.realized_pnl,
            breached = state.loss_limit_breached,
            "limits tracker opened"
        );

        let tracker = Self {
            path,
            clock,
            daily_loss_limit_usd,
            state: RwLock::new(state),
        };
        tracker.save()?;
        Ok(tracker)
    }

    /// Calendar date in New York for the injected clock's "now".
    fn trading_day(clock: &Arc<dyn Clock>) -> NaiveDate {
        clock.now_utc().with_timezone(&New_York).date_naive()
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Record the realized PnL of a completed round trip.
    pub fn record_realized_pnl(&self, pnl: Decimal) -> Result<(), LimitsError> {
        self.maybe_roll_day();
        {
            let mut s = self.state.write();
            s.realized_pnl += pnl;
            if -s.realized_pnl >= self.daily_loss_limit_usd && self.daily_loss_limit_usd > Decimal::ZERO {
                if !s.loss_limit_breached {
                    warn!(
                        realized_pnl = %s.realized_pnl,
                        limit_usd = %self.daily_loss_limit_usd,
                        "daily loss limit breached"
                    );
                }
                s.loss_limit_breached = true;
            }
        }
        self.save()
    }

    /// Count one submitted order.
    pub fn record_trade(&self) -> Result<(), LimitsError> {
        self.maybe_roll_day();
        self.state.write().trades_today += 1;
        self.save()
    }

    /// Count one same-day round trip (PDT accounting).
    pub fn record_day_trade(&self) -> Result<(), LimitsError> {
        self.maybe_roll_day();
        self.state.write().day_trades_today += 1;
        self.save()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn realized_pnl_today(&self) -> Decimal {
        self.maybe_roll_day();
        self.state.read().realized_pnl
    }

    pub fn trades_today(&self) -> u32 {
        self.maybe_roll_day();
        self.state.read().trades_today
    }

    pub fn day_trades_today(&self) -> u32 {
        self.maybe_roll_day();
        self.state.read().day_trades_today
    }

    pub fn is_loss_limit_breached(&self) -> bool {
        self.maybe_roll_day();
        self.state.read().loss_limit_breached
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn maybe_roll_day(&self) {
        let today = Self::trading_day(&self.clock);
        {
            let s = self.state.read();
            if s.trading_day == today {
                return;
            }
        }
        let mut s = self.state.write();
        if s.trading_day != today {
            info!(old_day = %s.trading_day, new_day = %today, "daily limits reset");
            *s = DayState::fresh(today);
            drop(s);
            if let Err(e) = self.save() {
                warn!(error = %e, "failed to persist limits reset");
            }
        }
    }

    fn save(&self) -> Result<(), LimitsError> {
        let snapshot = self.state.read().clone();
        let content = serde_json::to_string_pretty(&snapshot)?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).map_err(|e| LimitsError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| LimitsError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedClock;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn tracker(dir: &tempfile::TempDir, clock: Arc<FixedClock>) -> LimitsTracker {
        LimitsTracker::open(dir.path().join("limits.json"), clock, dec!(25)).unwrap()
    }

    #[test]
    fn breach_flag_set_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2026, 2, 9, 15, 0, 0).unwrap()));
        let t = tracker(&dir, clock);

        t.record_realized_pnl(dec!(-10)).unwrap();
        assert!(!t.is_loss_limit_breached());

        t.record_realized_pnl(dec!(-15)).unwrap();
        assert!(t.is_loss_limit_breached());
        assert_eq!(t.realized_pnl_today(), dec!(-25));
    }

    #[test]
    fn breach_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2026, 2, 9, 15, 0, 0).unwrap()));

        {
            let t = tracker(&dir, clock.clone());
            t.record_realized_pnl(dec!(-30)).unwrap();
            assert!(t.is_loss_limit_breached());
        }

        let t = tracker(&dir, clock);
        assert!(t.is_loss_limit_breached(), "restart must not clear the loss limit");
        assert_eq!(t.realized_pnl_today(), dec!(-30));
    }

    #[test]
    fn resets_on_new_york_day_rollover() {
        let dir = tempfile::tempdir().unwrap();
        // 2026-02-09 23:00 UTC == 18:00 New York (same NY day).
        let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2026, 2, 9, 23, 0, 0).unwrap()));
        let t = tracker(&dir, clock.clone());

        t.record_realized_pnl(dec!(-30)).unwrap();
        t.record_trade().unwrap();
        assert!(t.is_loss_limit_breached());

        // 2026-02-10 02:00 UTC is still 2026-02-09 21:00 in New York: no reset.
        clock.set(Utc.with_ymd_and_hms(2026, 2, 10, 2, 0, 0).unwrap());
        assert!(t.is_loss_limit_breached());
        assert_eq!(t.trades_today(), 1);

        // 2026-02-10 06:00 UTC is 2026-02-10 01:00 in New York: new session.
        clock.set(Utc.with_ymd_and_hms(2026, 2, 10, 6, 0, 0).unwrap());
        assert!(!t.is_loss_limit_breached());
        assert_eq!(t.realized_pnl_today(), dec!(0));
        assert_eq!(t.trades_today(), 0);
    }

    #[test]
    fn day_trade_counter_tracks_separately() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2026, 2, 9, 15, 0, 0).unwrap()));
        let t = tracker(&dir, clock);

        t.record_trade().unwrap();
        t.record_trade().unwrap();
        t.record_day_trade().unwrap();

        assert_eq!(t.trades_today(), 2);
        assert_eq!(t.day_trades_today(), 1);
    }
}
