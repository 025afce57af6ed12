#![forbid(unsafe_code)]

//! `agent-fleet` lifecycle daemon.
//!
//! Loads configuration, registers the built-in plugins, and runs the
//! lifecycle polling loop until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_fleet::config::OrchestratorConfig;
use agent_fleet::events::JsonlEventWriter;
use agent_fleet::orchestrator::lifecycle::LifecycleManager;
use agent_fleet::orchestrator::session_manager::SessionManager;
use agent_fleet::plugins::{PluginRegistry, PluginSlot};
use agent_fleet::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-fleet", about = "Coding-agent fleet lifecycle daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured poll interval, in seconds.
    #[arg(long)]
    interval_secs: Option<u64>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-fleet bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = OrchestratorConfig::load_from_path(&args.config)?;
    config.apply_env_overrides();
    if let Some(secs) = args.interval_secs {
        if secs == 0 {
            return Err(AppError::Config("--interval-secs must be greater than zero".into()));
        }
        config.poll_interval_seconds = secs;
    }
    let config = Arc::new(config);
    info!(
        data_dir = %config.data_dir.display(),
        projects = config.projects.len(),
        "configuration loaded"
    );

    // ── Plugins ─────────────────────────────────────────
    let registry = Arc::new(PluginRegistry::with_builtins(&config));
    for slot in [PluginSlot::Runtime, PluginSlot::Agent, PluginSlot::Workspace, PluginSlot::Notifier] {
        info!(%slot, plugins = ?registry.names(slot), "plugins available");
    }
    if config.agent_command.is_none() && config.defaults.agent == "command" {
        warn!("no [agent_command] configured; spawning with the default agent will fail");
    }

    // ── Lifecycle loop ──────────────────────────────────
    let sessions = SessionManager::new(Arc::clone(&config), Arc::clone(&registry));
    let lifecycle = LifecycleManager::new(Arc::clone(&config), registry, sessions);
    lifecycle.set_event_logger(Arc::new(JsonlEventWriter::new(config.events_dir())?));
    lifecycle.start(config.poll_interval());

    shutdown_signal().await;
    info!("shutdown signal received, waiting for the current poll to finish");
    lifecycle.stop_and_wait().await;
    info!("agent-fleet stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
