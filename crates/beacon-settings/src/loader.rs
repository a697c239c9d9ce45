//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `BEACON_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use beacon_core::NegativeLatencyPolicy;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{BEAT_INTERVAL_MS_RANGE, BeaconSettings};

/// Resolve the default settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a settings value the
/// server cannot run with is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let mut settings = read_merged(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_merged(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `BEACON_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut BeaconSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `BEACON_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored, leaving the file/default value.
pub fn apply_overrides_from<F>(settings: &mut BeaconSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("BEACON_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("BEACON_PORT", 1, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("BEACON_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = env.u64_in("BEACON_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v as usize;
    }
    if let Some(v) = env.u64_in("BEACON_OUTBOUND_QUEUE_SIZE", 1, 65_536) {
        settings.server.outbound_queue_size = v as usize;
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = env.u64_in(
        "BEACON_BEAT_INTERVAL_MS",
        *BEAT_INTERVAL_MS_RANGE.start(),
        *BEAT_INTERVAL_MS_RANGE.end(),
    ) {
        settings.heartbeat.beat_interval_ms = v;
    }
    if let Some(v) = env.string("BEACON_NEGATIVE_LATENCY") {
        match serde_json::from_value::<NegativeLatencyPolicy>(Value::String(v.clone())) {
            Ok(policy) => settings.heartbeat.negative_latency = policy,
            Err(_) => warn!(key = "BEACON_NEGATIVE_LATENCY", value = %v, "invalid policy env var, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("BEACON_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("BEACON_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "out-of-range env var, ignoring");
        }
        result
    }
}
