//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RacewireSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `RACEWIRE_*` environment overrides
//! 4. Validate
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{LogFormat, LogLevel, RacewireSettings, SourceKind};

/// Resolve the path to the settings file (`~/.racewire/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".racewire").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RacewireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<RacewireSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<RacewireSettings> {
    let defaults = serde_json::to_value(RacewireSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RacewireSettings = serde_json::from_value(merged)?;
    apply_overrides_with(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `RACEWIRE_*` environment variable overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut RacewireSettings) {
    apply_overrides_with(settings, |key| std::env::var(key).ok());
}

fn apply_overrides_with(settings: &mut RacewireSettings, env: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| env(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("RACEWIRE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&read, "RACEWIRE_PORT", |s| parse_u16_range(s, 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = parsed(&read, "RACEWIRE_PING_INTERVAL_MS", |s| {
        parse_u64_range(s, 100, 600_000)
    }) {
        settings.server.ping_interval_ms = v;
    }
    if let Some(v) = parsed(&read, "RACEWIRE_PING_TIMEOUT_MS", |s| {
        parse_u64_range(s, 100, 600_000)
    }) {
        settings.server.ping_timeout_ms = v;
    }
    if let Some(v) = parsed(&read, "RACEWIRE_SEND_TIMEOUT_MS", |s| {
        parse_u64_range(s, 1, 60_000)
    }) {
        settings.server.send_timeout_ms = v;
    }
    if let Some(v) = parsed(&read, "RACEWIRE_MAX_BIND_RETRIES", |s| {
        parse_u64_range(s, 0, 100).and_then(|n| u32::try_from(n).ok())
    }) {
        settings.server.max_bind_retries = v;
    }

    // ── Broadcast ───────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "RACEWIRE_TARGET_RATE_HZ", |s| {
        parse_f64_range(s, 0.1, 1000.0)
    }) {
        settings.broadcast.target_rate_hz = v;
    }

    // ── Source ──────────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "RACEWIRE_SOURCE", |s| s.parse::<SourceKind>().ok()) {
        settings.source.kind = v;
    }
    if let Some(v) = read("RACEWIRE_DUMP_PATH") {
        settings.source.dump_path = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "RACEWIRE_LOG_LEVEL", |s| s.parse::<LogLevel>().ok()) {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&read, "RACEWIRE_LOG_FORMAT", |s| s.parse::<LogFormat>().ok()) {
        settings.logging.format = v;
    }
    if let Some(v) = parsed(&read, "RACEWIRE_LOG_JSON", parse_bool) {
        settings.logging.format = if v { LogFormat::Json } else { LogFormat::Pretty };
    }
}

fn parsed<T>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = read(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}
