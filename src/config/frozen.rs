// =============================================================================
// Frozen config — immutable wrapper with a deterministic integrity hash
// =============================================================================
//
// The hash is SHA-256 over the canonical JSON serialization. serde_json's
// default map is ordered (BTreeMap), so serialization is already canonical
// with sorted keys. No mutable accessor exists; `check_integrity()` re-hashes
// to detect drift of the underlying data.
// =============================================================================

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the deterministic hash of a config value (first 16 hex chars).
pub fn config_hash(raw: &Value) -> String {
    let canonical = serde_json::to_string(raw).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Immutable validated configuration.
#[derive(Debug, Clone)]
pub struct FrozenConfig {
    data: Value,
    hash: String,
}

impl FrozenConfig {
    pub fn new(raw: Value) -> Self {
        let hash = config_hash(&raw);
        Self { data: raw, hash }
    }

    /// Access a value by dotted path, e.g. "risk.daily_loss_limit_usd".
    pub fn get(&self, dotted_path: &str) -> Option<&Value> {
        let mut current = &self.data;
        for key in dotted_path.split('.') {
            current = current.as_object()?.get(key)?;
        }
        Some(current)
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Re-hash the data and compare with the construction-time hash.
    pub fn check_integrity(&self) -> bool {
        config_hash(&self.data) == self.hash
    }

    /// Deep copy of the underlying data.
    pub fn to_value(&self) -> Value {
        self.data.clone()
    }
}
