//! Callstream Server - standalone headless host for the call-stream engine.
//!
//! Reads one command-surface verb per line from stdin (`start`, `stop`,
//! `pause`, `resume`, `graceful-shutdown`, `send_text`) and writes the
//! `+OK Success` / `-ERR Operation Failed` result to stdout. This is the
//! same dispatch surface a telephony platform's dialplan application would
//! drive over its own control channel; stdin/stdout stand in for that
//! channel here.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use callstream_core::{Command, Supervisor};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use crate::config::ServerConfig;

/// Callstream Server - headless telephony-to-WebSocket audio bridge.
#[derive(Parser, Debug)]
#[command(name = "callstream-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CALLSTREAM_LOG_LEVEL")]
    log_level: log::LevelFilter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Callstream Server v{}", env!("CARGO_PKG_VERSION"));

    let server_config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let core_config = server_config.to_core_config();

    log::info!(
        "Configuration: service_threads={}, buffer_secs={}, subprotocol={}",
        core_config.service_threads,
        core_config.buffer_secs,
        core_config.subprotocol_name
    );

    let supervisor = Supervisor::new(core_config).context("Failed to start transport worker pool")?;

    log::info!("Worker pool started, reading commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tokio::select! {
        () = run_command_loop(&supervisor, &mut lines) => {}
        () = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
        }
    }

    supervisor.shutdown().await;
    log::info!("Shutdown complete");
    Ok(())
}

async fn run_command_loop(
    supervisor: &Supervisor,
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let result = match Command::parse(&line) {
                    Ok(command) => supervisor.dispatch(command),
                    Err(e) => {
                        log::warn!("rejected command {line:?}: {e}");
                        callstream_core::format_result(false)
                    }
                };
                println!("{result}");
            }
            Ok(None) => {
                log::info!("stdin closed, waiting for shutdown signal");
                std::future::pending::<()>().await;
            }
            Err(e) => {
                log::error!("error reading stdin: {e}");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
