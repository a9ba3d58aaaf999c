use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

/// Output format for the stdout layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line. Suited to journald / log shippers.
    #[default]
    Json,
    /// Human-readable single line output for terminals.
    Compact,
}

/// How the process logs.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Level for everything without a module override. `RUST_LOG` wins.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "beacon_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid filter directive: {0}")]
    Filter(String),
    #[error("subscriber is no longer installed")]
    Reload(#[from] reload::Error),
}

/// Handle returned by [`init_telemetry`]. Keeps the reload handle for the
/// active filter so levels can change at runtime.
pub struct TelemetryGuard {
    handle: reload::Handle<EnvFilter, Registry>,
    levels: Arc<RwLock<(Level, Vec<(String, Level)>)>>,
}

impl TelemetryGuard {
    /// Swap in the levels from `config`, replacing the running filter
    /// (including one taken from `RUST_LOG`). The format cannot change.
    pub fn reconfigure(&self, config: &TelemetryConfig) -> Result<(), TelemetryError> {
        let mut levels = self.levels.write();
        *levels = (config.log_level, config.module_levels.clone());
        let filter = EnvFilter::try_new(filter_directives(&levels.0, &levels.1))
            .map_err(|e| TelemetryError::Filter(e.to_string()))?;
        self.handle.reload(filter)?;
        Ok(())
    }

    /// Default level and module overrides currently in force.
    pub fn levels(&self) -> (Level, Vec<(String, Level)>) {
        self.levels.read().clone()
    }
}

/// Render a level plus per-module overrides as an `EnvFilter` directive
/// string, e.g. `info,beacon_server=debug`.
pub fn filter_directives(level: &Level, modules: &[(String, Level)]) -> String {
    let mut filter = level.to_string().to_lowercase();
    for (module, level) in modules {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Parse a level name as used in config files and env vars.
pub fn parse_level(raw: &str) -> Option<Level> {
    raw.trim().parse().ok()
}

/// Initialize the telemetry subsystem. Call once at startup; later calls
/// leave the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let directives = filter_directives(&config.log_level, &config.module_levels);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&directives));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .boxed(),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
    {
        eprintln!("beacon-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        handle,
        levels: Arc::new(RwLock::new((config.log_level, config.module_levels))),
    }
}
