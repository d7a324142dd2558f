// =============================================================================
// Transaction log — append-only JSONL event stream for crash recovery
// =============================================================================
//
// Records are never rewritten. On restart the log is replayed to rebuild the
// set of already-submitted order ids, which backs the execution engine's
// idempotency guarantee: an internal order id that appears here is never
// sent to the broker again.
// =============================================================================

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TransactionLogError {
    #[error("transaction log I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transaction log serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only JSONL log. One JSON object per line:
/// `{seq, ts_utc, event, ...payload}`.
pub struct TransactionLog {
    path: PathBuf,
    file: Mutex<File>,
    seq: AtomicU64,
}

impl TransactionLog {
    /// Open (or create) the log at `path`, counting existing records so the
    /// sequence number continues monotonically across restarts.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TransactionLogError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TransactionLogError::Io {
                path: path.clone(),
                source: e,
            })?;
        }

        let existing = if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(|e| TransactionLogError::Io {
                path: path.clone(),
                source: e,
            })?);
            reader.lines().count() as u64
        } else {
            0
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TransactionLogError::Io {
                path: path.clone(),
                source: e,
            })?;

        info!(path = %path.display(), existing_records = existing, "transaction log opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
            seq: AtomicU64::new(existing),
        })
    }

    /// Append one event. The payload's fields are merged under the standard
    /// envelope; `seq`, `ts_utc`, and `event` always win.
    pub fn append(&self, event: &str, payload: Value) -> Result<(), TransactionLogError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let mut record = match payload {
            Value::Object(map) => Value::Object(map),
            other => json!({ "payload": other }),
        };
        if let Some(obj) = record.as_object_mut() {
            obj.insert("seq".into(), json!(seq));
            obj.entry("ts_utc")
                .or_insert_with(|| json!(Utc::now().to_rfc3339()));
            obj.insert("event".into(), json!(event));
        }

        let line = serde_json::to_string(&record)?;
        let mut file = self.file.lock();
        writeln!(file, "{line}").map_err(|e| TransactionLogError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        file.flush().map_err(|e| TransactionLogError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Replay the full log.
    pub fn read_all(&self) -> Result<Vec<Value>, TransactionLogError> {
        let _guard = self.file.lock(); // serialize against concurrent appends
        let reader = BufReader::new(File::open(&self.path).map_err(|e| TransactionLogError::Io {
            path: self.path.clone(),
            source: e,
        })?);

        let mut records = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| TransactionLogError::Io {
                path: self.path.clone(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(v) => records.push(v),
                Err(e) => warn!(line_no = i + 1, error = %e, "skipping corrupt transaction log line"),
            }
        }
        Ok(records)
    }

    /// Internal order ids that have already been submitted, reconstructed
    /// from `order_submitted` records.
    pub fn submitted_order_ids(&self) -> Result<HashSet<String>, TransactionLogError> {
        let mut ids = HashSet::new();
        for record in self.read_all()? {
            if record["event"] == "order_submitted" {
                if let Some(id) = record["internal_order_id"].as_str() {
                    ids.insert(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
