//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LinkSettings::default()`]
//! 2. If `~/.feedlink/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `FEEDLINK_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::LinkSettings;

/// Resolve the path to the settings file (`~/.feedlink/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".feedlink").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LinkSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// [`LinkSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LinkSettings> {
    load_settings_with(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, reading overrides through `lookup` instead of
/// the process environment.
pub fn load_settings_with<F>(path: &Path, lookup: F) -> Result<LinkSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(LinkSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LinkSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
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

/// Apply overrides read through `lookup`.
///
/// | variable | setting |
/// |----------|---------|
/// | `FEEDLINK_URL` | `server.url` |
/// | `FEEDLINK_RECONNECT` | `reconnect.enabled` |
/// | `FEEDLINK_RECONNECT_BASE_DELAY_MS` | `reconnect.baseDelayMs` |
/// | `FEEDLINK_RECONNECT_MAX_DELAY_MS` | `reconnect.maxDelayMs` |
/// | `FEEDLINK_RECONNECT_JITTER` | `reconnect.jitterFactor` |
/// | `FEEDLINK_RECONNECT_MAX_ATTEMPTS` | `reconnect.maxAttempts` |
/// | `FEEDLINK_REQUEST_TIMEOUT_MS` | `requests.timeoutMs` |
/// | `FEEDLINK_RESUBSCRIBE` | `subscriptions.resubscribeOnReconnect` |
/// | `FEEDLINK_OUTBOUND_CAPACITY` | `connection.outboundCapacity` |
/// | `FEEDLINK_LOG_LEVEL` | `logging.level` |
///
/// Invalid values are ignored with a warning.
pub fn apply_overrides<F>(settings: &mut LinkSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("FEEDLINK_URL") {
        settings.server.url = v;
    }

    // ── Reconnect ───────────────────────────────────────────────────
    if let Some(v) = env.bool("FEEDLINK_RECONNECT") {
        settings.reconnect.enabled = v;
    }
    if let Some(v) = env.u64("FEEDLINK_RECONNECT_BASE_DELAY_MS", 1, 3_600_000) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = env.u64("FEEDLINK_RECONNECT_MAX_DELAY_MS", 1, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }
    if let Some(v) = env.f64("FEEDLINK_RECONNECT_JITTER", 0.0, 1.0) {
        settings.reconnect.jitter_factor = v;
    }
    if let Some(v) = env.u32("FEEDLINK_RECONNECT_MAX_ATTEMPTS", 1, 1_000_000) {
        settings.reconnect.max_attempts = Some(v);
    }

    // ── Requests and subscriptions ──────────────────────────────────
    if let Some(v) = env.u64("FEEDLINK_REQUEST_TIMEOUT_MS", 0, 3_600_000) {
        settings.requests.timeout_ms = v;
    }
    if let Some(v) = env.bool("FEEDLINK_RESUBSCRIBE") {
        settings.subscriptions.resubscribe_on_reconnect = v;
    }
    if let Some(v) = env.usize("FEEDLINK_OUTBOUND_CAPACITY", 1, 1_000_000) {
        settings.connection.outbound_capacity = v;
    }

    if let Some(v) = env.string("FEEDLINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, "u32", |v| parse_u32_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        self.parsed(name, "f64", |v| parse_f64_range(v, min, max))
    }
}
