// =============================================================================
// Journal — append-only JSONL audit stream partitioned per UTC day
// =============================================================================
//
// Every event is stamped with `ts_utc` and the run's `run_id` (existing
// fields are never overwritten). All events land in daily/YYYY-MM-DD.jsonl;
// trade lifecycle events are mirrored into trades/YYYY-MM-DD.jsonl.
//
// Journal writes must never take down the trading loop: I/O failures are
// logged and swallowed.
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

/// Events mirrored into the trades partition.
const TRADE_EVENTS: &[&str] = &[
    "order_submitted",
    "order_filled",
    "ORDER_TTL_CANCEL",
    "protective_stop_submitted",
    "protective_stop_cancel_requested",
    "protective_stop_placed",
    "protective_stop_cancelled",
];

struct DayFile {
    date: String,
    file: File,
}

/// JSONL journal writer with stable run correlation.
pub struct JournalWriter {
    base_dir: PathBuf,
    run_id: String,
    daily: Mutex<Option<DayFile>>,
    trades: Mutex<Option<DayFile>>,
}

impl JournalWriter {
    /// Create a writer rooted at `base_dir` with a fresh run id.
    pub fn new(base_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::with_run_id(base_dir, Self::new_run_id())
    }

    pub fn with_run_id(base_dir: impl AsRef<Path>, run_id: String) -> std::io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(base_dir.join("daily"))?;
        std::fs::create_dir_all(base_dir.join("trades"))?;

        info!(base_dir = %base_dir.display(), run_id = %run_id, "journal opened");

        Ok(Self {
            base_dir,
            run_id,
            daily: Mutex::new(None),
            trades: Mutex::new(None),
        })
    }

    pub fn new_run_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append one event. Non-object payloads are wrapped; `ts_utc` and
    /// `run_id` are added when absent.
    pub fn write_event(&self, event: Value) {
        let mut record = match event {
            Value::Object(map) => Value::Object(map),
            other => json!({ "event": "raw", "payload": other }),
        };

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let event_name = record["event"].as_str().unwrap_or("").to_string();

        if let Some(obj) = record.as_object_mut() {
            obj.entry("ts_utc")
                .or_insert_with(|| json!(Utc::now().to_rfc3339()));
            obj.entry("run_id").or_insert_with(|| json!(self.run_id));
        }

        let line = match serde_json::to_string(&record) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "journal serialization failed");
                return;
            }
        };

        self.append_line(&self.daily, "daily", &date, &line);
        if TRADE_EVENTS.contains(&event_name.as_str()) {
            self.append_line(&self.trades, "trades", &date, &line);
        }
    }

    fn append_line(&self, slot: &Mutex<Option<DayFile>>, partition: &str, date: &str, line: &str) {
        let mut guard = slot.lock();

        let needs_rotate = guard.as_ref().map_or(true, |df| df.date != date);
        if needs_rotate {
            let path = self.base_dir.join(partition).join(format!("{date}.jsonl"));
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    *guard = Some(DayFile {
                        date: date.to_string(),
                        file,
                    });
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to open journal partition");
                    return;
                }
            }
        }

        if let Some(df) = guard.as_mut() {
            if let Err(e) = writeln!(df.file, "{line}").and_then(|_| df.file.flush()) {
                error!(partition, error = %e, "journal write failed");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn read_partition(dir: &Path, partition: &str) -> Vec<Value> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let path = dir.join(partition).join(format!("{date}.jsonl"));
        if !path.exists() {
            return Vec::new();
        }
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn events_are_stamped_with_run_id_and_ts() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalWriter::with_run_id(dir.path(), "run-abc".into()).unwrap();

        journal.write_event(json!({ "event": "boot", "mode": "paper", "paper": true }));

        let events = read_partition(dir.path(), "daily");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "boot");
        assert_eq!(events[0]["run_id"], "run-abc");
        assert!(events[0]["ts_utc"].is_string());
    }

    #[test]
    fn existing_run_id_and_ts_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalWriter::with_run_id(dir.path(), "run-abc".into()).unwrap();

        journal.write_event(json!({
            "event": "signal_received",
            "run_id": "other-run",
            "ts_utc": "2026-02-09T15:00:00+00:00",
        }));

        let events = read_partition(dir.path(), "daily");
        assert_eq!(events[0]["run_id"], "other-run");
        assert_eq!(events[0]["ts_utc"], "2026-02-09T15:00:00+00:00");
    }

    #[test]
    fn trade_lifecycle_events_are_mirrored() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalWriter::new(dir.path()).unwrap();

        journal.write_event(json!({ "event": "order_submitted", "internal_order_id": "ord-1" }));
        journal.write_event(json!({ "event": "risk_decision", "approved": true }));
        journal.write_event(json!({ "event": "ORDER_TTL_CANCEL", "internal_order_id": "ord-1" }));

        let daily = read_partition(dir.path(), "daily");
        let trades = read_partition(dir.path(), "trades");
        assert_eq!(daily.len(), 3);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0]["event"], "order_submitted");
        assert_eq!(trades[1]["event"], "ORDER_TTL_CANCEL");
    }

    #[test]
    fn all_events_share_one_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JournalWriter::new(dir.path()).unwrap();

        for i in 0..5 {
            journal.write_event(json!({ "event": "cycle", "n": i }));
        }

        let events = read_partition(dir.path(), "daily");
        let run_id = events[0]["run_id"].clone();
        assert!(events.iter().all(|e| e["run_id"] == run_id));
        assert_eq!(run_id, journal.run_id());
    }
}
