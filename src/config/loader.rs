// =============================================================================
// Config loader — YAML file + environment overrides + secret hygiene
// =============================================================================
//
// Priority (highest wins): environment variables, then the YAML file.
// Broker credentials come from BROKER_API_KEY / BROKER_API_SECRET with
// ALPACA_API_KEY / ALPACA_API_SECRET accepted as aliases.
//
// Secrets are NEVER logged: `scrub_secrets` replaces them for any output.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::debug;

/// Keys whose values must never be logged or displayed.
pub const SECRET_KEYS: &[&str] = &[
    "api_key",
    "api_secret",
    "broker_api_key",
    "broker_api_secret",
];

/// Credential environment variables, in priority order.
const API_KEY_ENVS: &[&str] = &["BROKER_API_KEY", "ALPACA_API_KEY"];
const API_SECRET_ENVS: &[&str] = &["BROKER_API_SECRET", "ALPACA_API_SECRET"];

/// Load the YAML config file into a JSON value with env overrides applied.
///
/// The path must name a file (not a directory); the file must parse to a
/// mapping.
pub fn load_raw(path: &Path) -> Result<Value> {
    if !path.exists() {
        bail!("configuration file not found: {}", path.display());
    }
    if !path.is_file() {
        bail!("configuration path is not a file: {}", path.display());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    let yaml: serde_yaml::Value = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse YAML config {}", path.display()))?;
    if yaml.is_null() {
        bail!("empty configuration file: {}", path.display());
    }

    let mut raw: Value = serde_json::to_value(&yaml)
        .context("config could not be converted to a JSON structure")?;
    if !raw.is_object() {
        bail!("config root must be a mapping: {}", path.display());
    }

    apply_env_overrides(&mut raw);
    debug!(path = %path.display(), "config loaded");
    Ok(raw)
}

/// Apply environment overrides onto a raw config value.
pub fn apply_env_overrides(raw: &mut Value) {
    let Some(top) = raw.as_object_mut() else {
        return;
    };

    let broker = top
        .entry("broker")
        .or_insert_with(|| json!({}));
    if let Some(broker) = broker.as_object_mut() {
        if let Some(key) = first_env(API_KEY_ENVS) {
            broker.insert("api_key".into(), json!(key));
        }
        if let Some(secret) = first_env(API_SECRET_ENVS) {
            broker.insert("api_secret".into(), json!(secret));
        }
        if let Ok(paper) = std::env::var("PAPER_TRADING") {
            match paper.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => {
                    broker.insert("paper_trading".into(), json!(true));
                }
                "false" | "0" | "no" => {
                    broker.insert("paper_trading".into(), json!(false));
                }
                _ => {}
            }
        }
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.is_empty())
}

/// Deep copy of the config with secret values replaced, safe for logging.
pub fn scrub_secrets(raw: &Value) -> Value {
    fn scrub(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        if SECRET_KEYS.contains(&k.to_lowercase().as_str()) {
                            (k.clone(), json!("[REDACTED]"))
                        } else {
                            (k.clone(), scrub(v))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(scrub).collect()),
            other => other.clone(),
        }
    }
    scrub(raw)
}

/// Whether any broker credential env var is set (for --env-check output;
/// values themselves are never returned).
pub fn credential_env_status() -> Vec<(String, bool)> {
    API_KEY_ENVS
        .iter()
        .chain(API_SECRET_ENVS.iter())
        .map(|name| (name.to_string(), std::env::var(name).map_or(false, |v| !v.is_empty())))
        .collect()
}
