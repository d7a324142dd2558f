// =============================================================================
// Bar provider — broker-backed market data with a short freshness cache
// =============================================================================
//
// The cache prevents refetching the same series several times inside one
// cycle (multiple strategies on one symbol) without ever serving data older
// than the configured freshness window.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::broker::types::BrokerError;
use crate::broker::BrokerApi;
use crate::clock::Clock;
use crate::data::bar::{Bar, Timeframe};

/// Source of recent bars for the runtime.
#[async_trait]
pub trait BarProvider: Send + Sync {
    async fn latest_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: u32,
    ) -> Result<Vec<Bar>, BrokerError>;
}

struct CachedSeries {
    fetched_at: DateTime<Utc>,
    lookback: u32,
    bars: Vec<Bar>,
}

/// Fetches bars from the broker, caching each series briefly.
pub struct BrokerBarProvider {
    broker: Arc<dyn BrokerApi>,
    clock: Arc<dyn Clock>,
    freshness: Duration,
    cache: Mutex<HashMap<String, CachedSeries>>,
}

impl BrokerBarProvider {
    pub fn new(broker: Arc<dyn BrokerApi>, clock: Arc<dyn Clock>, freshness_seconds: i64) -> Self {
        Self {
            broker,
            clock,
            freshness: Duration::seconds(freshness_seconds),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BarProvider for BrokerBarProvider {
    async fn latest_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback: u32,
    ) -> Result<Vec<Bar>, BrokerError> {
        let key = format!("{}:{}", symbol.to_uppercase(), timeframe);
        let now = self.clock.now_utc();

        if let Some(cached) = self.cache.lock().get(&key) {
            if now - cached.fetched_at < self.freshness && cached.lookback >= lookback {
                debug!(symbol, %timeframe, "bars served from cache");
                let start = cached.bars.len().saturating_sub(lookback as usize);
                return Ok(cached.bars[start..].to_vec());
            }
        }

        let bars = self
            .broker
            .get_bars(symbol, &timeframe.to_string(), lookback)
            .await?;

        self.cache.lock().insert(
            key,
            CachedSeries {
                fetched_at: now,
                lookback,
                bars: bars.clone(),
            },
        );
        Ok(bars)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedClock, MockBroker};
    use chrono::{TimeZone, Timelike};
    use rust_decimal_macros::dec;

    fn bar(minute: u32) -> Bar {
        Bar::new(
            "SPY",
            Utc.with_ymd_and_hms(2026, 2, 9, 15, minute, 0).unwrap(),
            dec!(100),
            dec!(101),
            dec!(99),
            dec!(100),
            Some(1000),
            "broker",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fetches_and_caches_within_freshness_window() {
        let broker = Arc::new(MockBroker::new());
        broker.set_bars("SPY", vec![bar(0), bar(1), bar(2)]);
        let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2026, 2, 9, 15, 3, 0).unwrap()));
        let provider = BrokerBarProvider::new(broker.clone(), clock.clone(), 5);

        let first = provider.latest_bars("SPY", Timeframe::Min1, 3).await.unwrap();
        assert_eq!(first.len(), 3);

        // Mutate the broker data; within the freshness window the cache wins.
        broker.set_bars("SPY", vec![bar(0)]);
        let second = provider.latest_bars("SPY", Timeframe::Min1, 3).await.unwrap();
        assert_eq!(second.len(), 3);

        // Past the freshness window the provider refetches.
        clock.advance(Duration::seconds(6));
        let third = provider.latest_bars("SPY", Timeframe::Min1, 3).await.unwrap();
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn smaller_lookback_is_served_from_cached_tail() {
        let broker = Arc::new(MockBroker::new());
        broker.set_bars("SPY", vec![bar(0), bar(1), bar(2)]);
        let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2026, 2, 9, 15, 3, 0).unwrap()));
        let provider = BrokerBarProvider::new(broker, clock, 5);

        provider.latest_bars("SPY", Timeframe::Min1, 3).await.unwrap();
        let tail = provider.latest_bars("SPY", Timeframe::Min1, 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].timestamp.minute(), 1);
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let broker = Arc::new(MockBroker::new());
        broker.fail_bars("feed down");
        let clock = Arc::new(FixedClock::at(Utc.with_ymd_and_hms(2026, 2, 9, 15, 3, 0).unwrap()));
        let provider = BrokerBarProvider::new(broker, clock, 5);

        assert!(provider.latest_bars("SPY", Timeframe::Min1, 3).await.is_err());
    }
}
