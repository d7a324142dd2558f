// =============================================================================
// Universe — scanner file contract (inbox, decisions, active universe)
// =============================================================================
//
// Three file-backed queues connect the external scanner to the runtime:
//   inbox.jsonl            candidates from the scanner (append-only)
//   decisions.jsonl        accept/reject outcomes (append-only)
//   universe_active.json   CORE symbols + accepted symbols with expiries
//
// Modes:
//   scanner  — accepted symbols only
//   accepted — CORE + accepted
//   hybrid   — CORE + accepted (default)
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Symbols always traded in hybrid/accepted modes.
pub const CORE_SYMBOLS: &[&str] = &["SPY", "QQQ"];

/// Candidate dedup window for the inbox adapter.
const INBOX_DEDUP_SECONDS: i64 = 300;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One scanner candidate (inbox.jsonl line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    /// "pre" or "rth".
    pub session: String,
    pub score: f64,
    #[serde(default)]
    pub features: HashMap<String, f64>,
    #[serde(default)]
    pub levels: HashMap<String, f64>,
    pub source: String,
    pub version: String,
}

/// One accept/reject outcome (decisions.jsonl line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub accepted: bool,
    pub reason: String,
}

/// universe_active.json shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveUniverse {
    #[serde(default)]
    pub core: Vec<String>,
    #[serde(default)]
    pub accepted: Vec<String>,
    #[serde(default)]
    pub expires_by_symbol: HashMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniverseMode {
    Scanner,
    Accepted,
    Hybrid,
}

impl UniverseMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "scanner" => Self::Scanner,
            "accepted" => Self::Accepted,
            "hybrid" => Self::Hybrid,
            other => {
                warn!(mode = other, "invalid universe mode, using hybrid");
                Self::Hybrid
            }
        }
    }
}

/// Loads tradable symbols from the active-universe file.
pub struct UniverseLoader {
    mode: UniverseMode,
    universe_path: PathBuf,
}

impl UniverseLoader {
    pub fn new(mode: UniverseMode, data_dir: impl AsRef<Path>) -> Self {
        Self {
            mode,
            universe_path: data_dir.as_ref().join("universe_active.json"),
        }
    }

    pub fn mode(&self) -> UniverseMode {
        self.mode
    }

    /// Symbols to trade under the configured mode. Falls back to CORE on a
    /// missing or unreadable file (scanner mode falls back to empty).
    pub fn symbols(&self) -> Vec<String> {
        let active = match self.read_active() {
            Some(a) => a,
            None => {
                return match self.mode {
                    UniverseMode::Scanner => Vec::new(),
                    _ => CORE_SYMBOLS.iter().map(|s| s.to_string()).collect(),
                };
            }
        };

        match self.mode {
            UniverseMode::Scanner => active.accepted,
            UniverseMode::Accepted | UniverseMode::Hybrid => {
                let core = if active.core.is_empty() {
                    CORE_SYMBOLS.iter().map(|s| s.to_string()).collect()
                } else {
                    active.core
                };
                let mut symbols: Vec<String> = core;
                for s in active.accepted {
                    if !symbols.contains(&s) {
                        symbols.push(s);
                    }
                }
                symbols.sort();
                symbols
            }
        }
    }

    fn read_active(&self) -> Option<ActiveUniverse> {
        let content = std::fs::read_to_string(&self.universe_path).ok()?;
        match serde_json::from_str::<ActiveUniverse>(&content) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!(path = %self.universe_path.display(), error = %e, "unreadable active universe");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inbox adapter
// ---------------------------------------------------------------------------

/// Appends scanner candidates to inbox.jsonl with a per-symbol dedup window.
pub struct InboxAdapter {
    inbox_path: PathBuf,
    recent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InboxAdapter {
    pub fn new(inbox_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let inbox_path = inbox_path.as_ref().to_path_buf();
        if let Some(parent) = inbox_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            inbox_path,
            recent: Mutex::new(HashMap::new()),
        })
    }

    /// Append one candidate. Returns false when deduplicated (same symbol
    /// written within the dedup window).
    pub fn write_candidate(&self, candidate: &CandidateRecord) -> std::io::Result<bool> {
        let now = candidate.ts;
        {
            let recent = self.recent.lock();
            if let Some(last) = recent.get(&candidate.symbol) {
                if now - *last < Duration::seconds(INBOX_DEDUP_SECONDS) {
                    return Ok(false);
                }
            }
        }

        let line = serde_json::to_string(candidate)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inbox_path)?;
        writeln!(file, "{line}")?;

        self.recent.lock().insert(candidate.symbol.clone(), now);
        info!(symbol = %candidate.symbol, score = candidate.score, "candidate written to inbox");
        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn write_active(dir: &Path, json: &str) {
        std::fs::write(dir.join("universe_active.json"), json).unwrap();
    }

    #[test]
    fn hybrid_merges_core_and_accepted() {
        let dir = tempfile::tempdir().unwrap();
        write_active(
            dir.path(),
            r#"{ "core": ["SPY", "QQQ"], "accepted": ["TSLA", "QQQ"], "expires_by_symbol": {} }"#,
        );

        let loader = UniverseLoader::new(UniverseMode::Hybrid, dir.path());
        assert_eq!(loader.symbols(), vec!["QQQ", "SPY", "TSLA"]);
    }

    #[test]
    fn scanner_mode_uses_accepted_only() {
        let dir = tempfile::tempdir().unwrap();
        write_active(dir.path(), r#"{ "core": ["SPY"], "accepted": ["NVDA"] }"#);

        let loader = UniverseLoader::new(UniverseMode::Scanner, dir.path());
        assert_eq!(loader.symbols(), vec!["NVDA"]);
    }

    #[test]
    fn missing_file_falls_back_to_core() {
        let dir = tempfile::tempdir().unwrap();
        let loader = UniverseLoader::new(UniverseMode::Hybrid, dir.path());
        assert_eq!(loader.symbols(), vec!["SPY", "QQQ"]);

        let loader = UniverseLoader::new(UniverseMode::Scanner, dir.path());
        assert!(loader.symbols().is_empty());
    }

    #[test]
    fn mode_parse_defaults_to_hybrid() {
        assert_eq!(UniverseMode::parse("scanner"), UniverseMode::Scanner);
        assert_eq!(UniverseMode::parse("ACCEPTED"), UniverseMode::Accepted);
        assert_eq!(UniverseMode::parse("bogus"), UniverseMode::Hybrid);
    }

    #[test]
    fn decision_record_round_trips() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 9, 15, 0, 0).unwrap();
        let record = DecisionRecord {
            id: format!("{}:CRVS:scanner_v2", ts.to_rfc3339()),
            ts,
            symbol: "CRVS".into(),
            accepted: false,
            reason: "spread_too_wide".into(),
        };

        let line = serde_json::to_string(&record).unwrap();
        let back: DecisionRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.symbol, "CRVS");
        assert!(!back.accepted);
        assert_eq!(back.reason, "spread_too_wide");
    }

    #[test]
    fn inbox_adapter_dedups_within_window() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = InboxAdapter::new(dir.path().join("inbox.jsonl")).unwrap();

        let t0 = Utc.with_ymd_and_hms(2026, 2, 9, 15, 0, 0).unwrap();
        let mut candidate = CandidateRecord {
            id: format!("{}:CRVS:scanner_v2", t0.to_rfc3339()),
            ts: t0,
            symbol: "CRVS".into(),
            session: "pre".into(),
            score: 8.7,
            features: HashMap::new(),
            levels: HashMap::new(),
            source: "scanner_v2".into(),
            version: "2.1".into(),
        };

        assert!(adapter.write_candidate(&candidate).unwrap());
        // Within 5 minutes: deduplicated.
        candidate.ts = t0 + Duration::seconds(200);
        assert!(!adapter.write_candidate(&candidate).unwrap());
        // Past the window: written again.
        candidate.ts = t0 + Duration::seconds(301);
        assert!(adapter.write_candidate(&candidate).unwrap());

        let lines = std::fs::read_to_string(dir.path().join("inbox.jsonl")).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }
}
