//! # beacon
//!
//! Binary entry point: runs the settings server, a headless display agent,
//! or one-off admin writes against a running server.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use beacon_client::{
    load_agent_config, load_or_create_display_id, AdminClient, DisplaySurface, HttpSource,
    LogSurface, SettingsSource, SnapshotCache, SyncAgent,
};
use beacon_core::AlertLevel;
use beacon_server::{load_config, BeaconServer};
use beacon_telemetry::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time settings distribution for unattended displays.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the settings server. SIGHUP re-reads the log level from the
    /// config file.
    Serve {
        /// JSON config file, deep-merged over defaults.
        #[arg(long, env = "BEACON_CONFIG")]
        config: Option<PathBuf>,
        /// Overrides the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a headless display that logs what it would show.
    Display {
        /// JSON agent config file.
        #[arg(long, env = "BEACON_DISPLAY_CONFIG")]
        config: Option<PathBuf>,
        /// Overrides the configured server URL.
        #[arg(long)]
        server: Option<String>,
    },
    /// Write one setting. VALUE is parsed as JSON, else taken as a string.
    Set {
        #[command(flatten)]
        admin: AdminArgs,
        key: String,
        value: String,
    },
    /// Raise or cancel an emergency alert.
    Alert {
        #[command(flatten)]
        admin: AdminArgs,
        #[arg(long, value_enum, default_value = "critical")]
        level: LevelArg,
        /// Clear the active alert instead of raising one.
        #[arg(long, conflicts_with = "title")]
        cancel: bool,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "")]
        message: String,
    },
}

#[derive(clap::Args, Debug)]
struct AdminArgs {
    #[arg(long, env = "BEACON_SERVER_URL", default_value = "http://127.0.0.1:3000")]
    server: String,
    #[arg(long, env = "BEACON_API_KEY", hide_env_values = true)]
    api_key: String,
}

impl AdminArgs {
    fn client(&self) -> Result<AdminClient> {
        AdminClient::new(&self.server, SecretString::from(self.api_key.clone()))
            .context("building admin client")
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LevelArg {
    Info,
    Warning,
    Critical,
}

impl From<LevelArg> for AlertLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Info => AlertLevel::Info,
            LevelArg::Warning => AlertLevel::Warning,
            LevelArg::Critical => AlertLevel::Critical,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, port } => serve(config, port).await,
        Command::Display { config, server } => display(config, server).await,
        Command::Set { admin, key, value } => {
            let _guard = init_telemetry(cli_telemetry());
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let clients = admin.client()?.set(&key, value).await?;
            println!("{key} updated, sent to {clients} display(s)");
            Ok(())
        }
        Command::Alert {
            admin,
            level,
            cancel,
            title,
            message,
        } => {
            let _guard = init_telemetry(cli_telemetry());
            let client = admin.client()?;
            let clients = if cancel {
                client.emergency_cancel().await?
            } else {
                let Some(title) = title else {
                    bail!("--title is required unless --cancel is given");
                };
                client.emergency_alert(level.into(), &title, &message).await?
            };
            println!("sent to {clients} display(s)");
            Ok(())
        }
    }
}

fn cli_telemetry() -> TelemetryConfig {
    TelemetryConfig {
        log_level: tracing::Level::WARN,
        format: LogFormat::Compact,
        ..TelemetryConfig::default()
    }
}

async fn serve(config_path: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut config = load_config(config_path.as_deref()).context("loading server config")?;
    if let Some(port) = port {
        config.port = port;
    }
    let telemetry = init_telemetry(config.telemetry());

    let server = BeaconServer::new(config).context("opening settings store")?;
    let handle = server.listen().await.context("binding listener")?;
    info!(addr = %handle.addr, "beacon server ready");

    wait_for_stop(config_path.as_deref(), &telemetry).await?;
    let report = server
        .shutdown()
        .graceful_shutdown(handle.into_tasks(), Some(SHUTDOWN_TIMEOUT))
        .await;
    info!(
        displays = report.notified,
        aborted = report.aborted,
        "beacon server stopped"
    );
    Ok(())
}

/// Wait for ctrl+c, reloading log levels on every SIGHUP meanwhile.
#[cfg(unix)]
async fn wait_for_stop(config_path: Option<&Path>, telemetry: &TelemetryGuard) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => return res.context("listening for ctrl+c"),
            _ = hangup.recv() => reload_log_levels(config_path, telemetry),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_stop(_config_path: Option<&Path>, _telemetry: &TelemetryGuard) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")
}

fn reload_log_levels(config_path: Option<&Path>, telemetry: &TelemetryGuard) {
    let config = match load_config(config_path) {
        Ok(config) => config.telemetry(),
        Err(e) => {
            warn!(error = %e, "config reload failed, log levels unchanged");
            return;
        }
    };
    match telemetry.reconfigure(&config) {
        Ok(()) => info!(level = %config.log_level, "log levels reloaded"),
        Err(e) => warn!(error = %e, "could not apply reloaded log levels"),
    }
}

async fn display(config_path: Option<PathBuf>, server: Option<String>) -> Result<()> {
    let mut config = load_agent_config(config_path.as_deref()).context("loading agent config")?;
    if let Some(server) = server {
        config.server_url = server;
    }
    let _telemetry = init_telemetry(TelemetryConfig::default());

    let display_id =
        load_or_create_display_id(&config.identity_path).context("loading display id")?;
    let source = HttpSource::new(&config.server_url)?
        .with_idle_timeout(config.idle_timeout())
        .with_request_timeout(config.request_timeout());

    let mut agent = SyncAgent::new(
        Arc::new(source) as Arc<dyn SettingsSource>,
        Arc::new(LogSurface) as Arc<dyn DisplaySurface>,
        config.identity(display_id),
        config.clone(),
    );
    if let Some(path) = &config.cache_path {
        agent = agent.with_cache(SnapshotCache::new(path));
    }

    let cancel = CancellationToken::new();
    let task = agent.spawn(cancel.clone());
    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;
    cancel.cancel();
    task.await.context("sync agent panicked")?;
    Ok(())
}
