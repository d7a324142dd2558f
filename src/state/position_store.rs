// =============================================================================
// Position store — durable symbol → position map
// =============================================================================
//
// One open position per symbol at most. BUY fills accumulate into the
// existing position with a weighted-average entry price; a SELL fill that
// brings the quantity to zero deletes the record.
//
// Persistence uses the atomic tmp + rename pattern so a crash mid-write can
// never corrupt the file. All quantities and prices are exact decimals.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PositionStoreError {
    #[error("position store I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("position store serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    /// Weighted-average entry price across entry fills.
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub strategy: String,
    /// Internal id of the order that opened (or last added to) the position.
    pub order_id: String,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

/// Durable position map with per-operation atomic writes.
pub struct PositionStore {
    path: PathBuf,
    positions: RwLock<HashMap<String, Position>>,
}

impl PositionStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PositionStoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PositionStoreError::Io {
                path: path.clone(),
                source: e,
            })?;
        }

        let positions: HashMap<String, Position> = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| PositionStoreError::Io {
                path: path.clone(),
                source: e,
            })?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            HashMap::new()
        };

        info!(path = %path.display(), count = positions.len(), "position store opened");

        Ok(Self {
            path,
            positions: RwLock::new(positions),
        })
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Insert or accumulate a position.
    ///
    /// When a position already exists for the symbol, the quantities are
    /// added and the entry price becomes the weighted average
    /// `(q1*p1 + q2*p2) / (q1 + q2)`. The original entry time is kept.
    pub fn upsert(&self, incoming: Position) -> Result<(), PositionStoreError> {
        {
            let mut positions = self.positions.write();
            let symbol = incoming.symbol.to_uppercase();

            match positions.get_mut(&symbol) {
                Some(existing) => {
                    let combined_qty = existing.qty + incoming.qty;
                    if combined_qty > Decimal::ZERO {
                        existing.entry_price = (existing.qty * existing.entry_price
                            + incoming.qty * incoming.entry_price)
                            / combined_qty;
                    }
                    existing.qty = combined_qty;
                    existing.order_id = incoming.order_id;
                    if incoming.stop_loss.is_some() {
                        existing.stop_loss = incoming.stop_loss;
                    }
                    if incoming.take_profit.is_some() {
                        existing.take_profit = incoming.take_profit;
                    }
                    debug!(
                        symbol = %symbol,
                        qty = %existing.qty,
                        entry_price = %existing.entry_price,
                        "position accumulated"
                    );
                }
                None => {
                    debug!(symbol = %symbol, qty = %incoming.qty, "position created");
                    positions.insert(
                        symbol.clone(),
                        Position {
                            symbol,
                            ..incoming
                        },
                    );
                }
            }
        }
        self.save()
    }

    /// Replace a position with broker truth (recovery / auto-heal path).
    /// No weighted-average math: what the broker says, we store.
    pub fn replace(&self, position: Position) -> Result<(), PositionStoreError> {
        {
            let mut positions = self.positions.write();
            let symbol = position.symbol.to_uppercase();
            positions.insert(symbol.clone(), Position { symbol, ..position });
        }
        self.save()
    }

    /// Reduce a position by `qty` (exit fill). Deletes the record when the
    /// remaining quantity reaches zero or below.
    pub fn reduce(&self, symbol: &str, qty: Decimal) -> Result<(), PositionStoreError> {
        {
            let mut positions = self.positions.write();
            let key = symbol.to_uppercase();
            match positions.get_mut(&key) {
                Some(existing) => {
                    existing.qty -= qty;
                    if existing.qty <= Decimal::ZERO {
                        positions.remove(&key);
                        info!(symbol = %key, "position flattened");
                    }
                }
                None => {
                    warn!(symbol = %key, "reduce on missing position ignored");
                }
            }
        }
        self.save()
    }

    /// Attach protective levels to an existing position.
    pub fn set_protection_levels(
        &self,
        symbol: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), PositionStoreError> {
        {
            let mut positions = self.positions.write();
            if let Some(existing) = positions.get_mut(&symbol.to_uppercase()) {
                existing.stop_loss = stop_loss;
                existing.take_profit = take_profit;
            }
        }
        self.save()
    }

    /// Delete a position outright.
    pub fn delete(&self, symbol: &str) -> Result<(), PositionStoreError> {
        {
            let mut positions = self.positions.write();
            if positions.remove(&symbol.to_uppercase()).is_some() {
                info!(symbol = %symbol.to_uppercase(), "position deleted");
            }
        }
        self.save()
    }

    /// Remove every position (paper auto-heal of phantom local state).
    pub fn clear(&self) -> Result<(), PositionStoreError> {
        self.positions.write().clear();
        self.save()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.read().get(&symbol.to_uppercase()).cloned()
    }

    pub fn all(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.positions
            .read()
            .get(&symbol.to_uppercase())
            .map_or(false, |p| p.qty != Decimal::ZERO)
    }

    pub fn open_count(&self) -> usize {
        self.positions.read().len()
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    fn save(&self) -> Result<(), PositionStoreError> {
        let snapshot = self.positions.read().clone();
        let content = serde_json::to_string_pretty(&snapshot)?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).map_err(|e| PositionStoreError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| PositionStoreError::Io {
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
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn pos(symbol: &str, qty: Decimal, price: Decimal) -> Position {
        Position {
            symbol: symbol.into(),
            qty,
            entry_price: price,
            entry_time: Utc.with_ymd_and_hms(2026, 2, 9, 15, 0, 0).unwrap(),
            strategy: "vwap_micro".into(),
            order_id: "ord-1".into(),
            stop_loss: None,
            take_profit: None,
        }
    }

    fn store(dir: &tempfile::TempDir) -> PositionStore {
        PositionStore::open(dir.path().join("positions.json")).unwrap()
    }

    #[test]
    fn upsert_accumulates_with_weighted_average() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);

        s.upsert(pos("SPY", dec!(50), dec!(100.00))).unwrap();
        s.upsert(pos("SPY", dec!(50), dec!(102.00))).unwrap();

        let p = s.get("SPY").unwrap();
        assert_eq!(p.qty, dec!(100));
        assert_eq!(p.entry_price, dec!(101.00));
        assert_eq!(s.open_count(), 1);
    }

    #[test]
    fn reduce_flattens_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);

        s.upsert(pos("SPY", dec!(10), dec!(100))).unwrap();
        s.reduce("SPY", dec!(4)).unwrap();
        assert_eq!(s.get("SPY").unwrap().qty, dec!(6));

        s.reduce("SPY", dec!(6)).unwrap();
        assert!(s.get("SPY").is_none());
        assert!(!s.has_open_position("SPY"));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        {
            let s = PositionStore::open(&path).unwrap();
            s.upsert(pos("SPY", dec!(1.5), dec!(99.90))).unwrap();
        }

        let s = PositionStore::open(&path).unwrap();
        let p = s.get("spy").unwrap();
        assert_eq!(p.qty, dec!(1.5));
        assert_eq!(p.entry_price, dec!(99.90));
    }

    #[test]
    fn replace_overwrites_without_averaging() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);

        s.upsert(pos("SPY", dec!(10), dec!(100))).unwrap();
        s.replace(pos("SPY", dec!(3), dec!(97))).unwrap();

        let p = s.get("SPY").unwrap();
        assert_eq!(p.qty, dec!(3));
        assert_eq!(p.entry_price, dec!(97));
    }

    #[test]
    fn symbols_are_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);

        s.upsert(pos("spy", dec!(1), dec!(100))).unwrap();
        assert!(s.has_open_position("SPY"));
        s.delete("Spy").unwrap();
        assert_eq!(s.open_count(), 0);
    }
}
