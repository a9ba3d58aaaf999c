//! Display agent configuration.
//!
//! Compiled defaults, then an optional JSON file (camelCase, partial is
//! fine), then `BEACON_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_core::{normalize_tags, DisplayId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identity::DisplayIdentity;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub server_url: String,
    /// File holding this display's id across restarts.
    pub identity_path: PathBuf,
    /// Last-known-good snapshot. `None` disables the cache rung.
    pub cache_path: Option<PathBuf>,
    pub name: String,
    pub location: String,
    pub resolution: String,
    pub page: String,
    /// Provisioning tags, sent on every connect and honored only the first
    /// time the server sees this display.
    pub tags: Vec<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Consecutive failed attempts before falling back while state exists.
    pub fallback_after_failures: u32,
    /// Push channel idle timeout. Must exceed the server's keep-alive interval.
    pub idle_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub bell_tick_secs: u64,
    /// Run the dismissal, livestream and bell pollers.
    pub pollers: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            identity_path: PathBuf::from("data/display-id"),
            cache_path: Some(PathBuf::from("data/snapshot-cache.json")),
            name: String::new(),
            location: String::new(),
            resolution: String::new(),
            page: String::new(),
            tags: Vec::new(),
            reconnect_delay_ms: 5_000,
            fallback_after_failures: 3,
            idle_timeout_secs: 60,
            request_timeout_secs: 10,
            bell_tick_secs: 30,
            pollers: true,
        }
    }
}

impl AgentConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bell_tick(&self) -> Duration {
        Duration::from_secs(self.bell_tick_secs.max(1))
    }

    /// Identity for `display_id` carrying this config's metadata.
    pub fn identity(&self, display_id: DisplayId) -> DisplayIdentity {
        DisplayIdentity {
            display_id,
            name: self.name.clone(),
            location: self.location.clone(),
            resolution: self.resolution.clone(),
            page: self.page.clone(),
            tags: normalize_tags(&self.tags),
        }
    }
}

/// Load from an optional JSON file, then apply env overrides. A missing
/// file yields defaults.
pub fn load_agent_config(path: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading agent config from file");
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        }
        _ => AgentConfig::default(),
    };
    apply_overrides_from(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

fn apply_overrides_from<F>(config: &mut AgentConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("BEACON_SERVER_URL") {
        config.server_url = v;
    }
    if let Some(v) = string("BEACON_IDENTITY_PATH") {
        config.identity_path = PathBuf::from(v);
    }
    if let Some(v) = string("BEACON_CACHE_PATH") {
        config.cache_path = Some(PathBuf::from(v));
    }
    if let Some(v) = string("BEACON_DISPLAY_NAME") {
        config.name = v;
    }
    if let Some(v) = string("BEACON_DISPLAY_LOCATION") {
        config.location = v;
    }
    if let Some(v) = string("BEACON_DISPLAY_TAGS") {
        config.tags = v.split(',').map(str::to_owned).collect();
    }
    if let Some(v) = string("BEACON_RECONNECT_DELAY_MS") {
        match v.trim().parse::<u64>() {
            Ok(ms) if (100..=600_000).contains(&ms) => config.reconnect_delay_ms = ms,
            _ => warn!(key = "BEACON_RECONNECT_DELAY_MS", value = %v, "invalid integer env var, ignoring"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(cfg.fallback_after_failures, 3);
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(60));
        assert!(cfg.pollers);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("display.json");
        std::fs::write(&path, r#"{"serverUrl": "http://beacon.local:3000", "tags": ["Gym"]}"#)
            .unwrap();
        let cfg = load_agent_config(Some(&path)).unwrap();
        assert_eq!(cfg.server_url, "http://beacon.local:3000");
        assert_eq!(cfg.reconnect_delay_ms, 5_000);
        let identity = cfg.identity(DisplayId::from_raw("d1"));
        assert!(identity.tags.contains("gym"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_agent_config(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(cfg.bell_tick_secs, 30);
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let mut cfg = AgentConfig::default();
        apply_overrides_from(
            &mut cfg,
            env(&[
                ("BEACON_SERVER_URL", "http://10.0.0.2:3000"),
                ("BEACON_DISPLAY_TAGS", "gym, athletics"),
                ("BEACON_RECONNECT_DELAY_MS", "5"),
            ]),
        );
        assert_eq!(cfg.server_url, "http://10.0.0.2:3000");
        assert_eq!(cfg.tags, ["gym", " athletics"]);
        assert_eq!(cfg.reconnect_delay_ms, 5_000);
    }
}
