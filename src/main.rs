#![forbid(unsafe_code)]

//! `flagpipe` server binary.
//!
//! Loads configuration, starts the local socket listener, and serves clients
//! until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use flagpipe::server::listener;
use flagpipe::{AppError, GlobalConfig, Result, ServerState};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "flagpipe", about = "Shared flag server", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the IPC socket name from the configuration.
    #[arg(long)]
    ipc_name: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("flagpipe server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(name) = args.ipc_name {
        config.ipc_name = name;
        config.validate()?;
    }
    info!(
        ipc_name = %config.ipc_name,
        max_frame_bytes = config.max_frame_bytes,
        "configuration loaded"
    );

    let state = Arc::new(ServerState::new(config));
    let ct = CancellationToken::new();
    let server = listener::spawn_flag_server(Arc::clone(&state), ct.clone())?;

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = server.await {
        tracing::error!(%err, "flag server task failed");
    }
    info!(flags = state.flags.len(), "flagpipe shut down");

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
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
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
