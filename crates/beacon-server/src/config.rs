//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a config file is given and exists, deep-merge its values over defaults
//! 3. Apply `BEACON_*` environment variable overrides (highest priority)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use beacon_telemetry::{parse_level, LogFormat, TelemetryConfig};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the beacon server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"` so displays on the LAN can reach it).
    pub host: String,
    /// Port to bind. `0` auto-assigns.
    pub port: u16,
    /// Settings file backing the store.
    pub settings_path: PathBuf,
    /// Shared admin secret. Without one, every login fails.
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    /// Idle lifetime of an admin session.
    pub session_ttl_secs: u64,
    /// How often expired sessions are swept.
    pub session_sweep_secs: u64,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_secs: u64,
    /// Per-display outbound queue length. Messages beyond it are dropped.
    pub display_queue_capacity: usize,
    /// Upper bound for non-streaming requests.
    pub request_timeout_secs: u64,
    /// Allow cross-origin requests from any origin (admin UI on another host).
    pub cors_permissive: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            settings_path: PathBuf::from("data/settings.json"),
            api_key: None,
            session_ttl_secs: 24 * 60 * 60,
            session_sweep_secs: 60 * 60,
            keep_alive_secs: 15,
            display_queue_capacity: 64,
            request_timeout_secs: 30,
            cors_permissive: true,
            log_level: "info".into(),
            log_format: LogFormat::Json,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: parse_level(&self.log_level).unwrap_or(tracing::Level::INFO),
            module_levels: Vec::new(),
            format: self.log_format,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

/// Load config from an optional JSON file, then apply env overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let defaults = serde_json::to_value(ServerConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: ServerConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Overlay `source` onto `target`. Objects merge key by key; anything else
/// in `source` wins outright, except `null`, which leaves `target` alone.
pub fn deep_merge(target: Value, source: Value) -> Value {
    let (mut base, overlay) = match (target, source) {
        (Value::Object(base), Value::Object(overlay)) => (base, overlay),
        (target, Value::Null) => return target,
        (_, source) => return source,
    };
    for (key, value) in overlay {
        let merged = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None if value.is_null() => continue,
            None => value,
        };
        let _ = base.insert(key, merged);
    }
    Value::Object(base)
}

/// Apply `BEACON_*` environment overrides. Invalid values are ignored
/// with a warning.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    apply_overrides_from(config, |name| std::env::var(name).ok());
}

fn apply_overrides_from<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let u64_in = |name: &str, range: RangeInclusive<u64>| {
        let raw = lookup(name)?;
        let parsed = parse_in_range(&raw, range);
        if parsed.is_none() {
            warn!(key = name, value = %raw, "invalid integer env var, ignoring");
        }
        parsed
    };

    if let Some(v) = string("BEACON_HOST") {
        config.host = v;
    }
    if let Some(v) = lookup("BEACON_PORT") {
        match parse_in_range(&v, 0..=u16::MAX) {
            Some(port) => config.port = port,
            None => warn!(key = "BEACON_PORT", value = %v, "invalid port, ignoring"),
        }
    }
    if let Some(v) = string("BEACON_SETTINGS_PATH") {
        config.settings_path = PathBuf::from(v);
    }
    if let Some(v) = string("BEACON_API_KEY") {
        config.api_key = Some(SecretString::from(v));
    }
    if let Some(v) = u64_in("BEACON_SESSION_TTL_SECS", 60..=30 * 24 * 60 * 60) {
        config.session_ttl_secs = v;
    }
    if let Some(v) = u64_in("BEACON_KEEP_ALIVE_SECS", 1..=300) {
        config.keep_alive_secs = v;
    }
    if let Some(v) = lookup("BEACON_CORS_PERMISSIVE") {
        match parse_flag(&v) {
            Some(b) => config.cors_permissive = b,
            None => warn!(key = "BEACON_CORS_PERMISSIVE", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = string("BEACON_LOG_LEVEL") {
        if parse_level(&v).is_some() {
            config.log_level = v;
        } else {
            warn!(key = "BEACON_LOG_LEVEL", value = %v, "invalid log level, ignoring");
        }
    }
    if let Some(v) = string("BEACON_LOG_FORMAT") {
        match serde_json::from_value(Value::String(v.to_lowercase())) {
            Ok(format) => config.log_format = format,
            Err(_) => warn!(key = "BEACON_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

/// `on`/`off` style flag, case-insensitive.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_in_range<T>(raw: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    raw.trim().parse().ok().filter(|n| range.contains(n))
}
