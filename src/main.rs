//! mqspeak - MQTT-to-HTTP telemetry bridge
//!
//! Subscribes to one or more MQTT brokers, collects the field values
//! published on separate topics into per-channel measurements, applies
//! each channel's update-rate policy, and uploads accepted measurements
//! to ThingSpeak or Phant.
// The main module is responsible for:
// - Command-line parsing and logging setup.
// - Loading and validating the configuration (any error is fatal here).
// - Wiring receivers, supervisor, updaters and dispatcher together.
// - Signal handling and the graceful shutdown cascade.

use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

mod buffer;
mod config;
mod data;
mod dispatcher;
mod receiver;
mod sender;
mod supervisor;
mod updater;

#[cfg(test)]
mod tests;

use config::BridgeConfig;
use data::FieldMapping;
use dispatcher::Dispatcher;
use receiver::BrokerReceiver;
use sender::HttpSender;
use supervisor::Supervisor;
use updater::{build_updater, SharedUpdater};

/// Command-line arguments for the bridge
#[derive(Parser, Debug)]
#[command(name = "mqspeak")]
#[command(version)]
#[command(about = "MQTT-to-HTTP telemetry bridge for ThingSpeak and Phant channels", long_about = None)]
struct CliArgs {
    /// Path to the configuration file
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        default_value = "/etc/mqspeak.conf"
    )]
    config: PathBuf,

    /// Log at INFO level instead of ERROR
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Log to stdout instead of the rolling log file
    #[arg(short = 'o', long = "log-stdout")]
    log_stdout: bool,
}

/// Initialize `tracing`. Returns the appender guard that must stay alive
/// for the lifetime of the process when logging to a file.
fn init_logging(args: &CliArgs) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // RUST_LOG takes precedence; otherwise the -v flag decides.
    let default_directive = if args.verbose {
        "mqspeak=info"
    } else {
        "mqspeak=error"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if args.log_stdout {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        None
    } else {
        let file_appender = tracing_appender::rolling::daily("./logs", "mqspeak.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .init();
        Some(guard)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    let _guard = init_logging(&cli_args);

    info!("mqspeak starting up");
    info!("configuration file: {}", cli_args.config.display());

    // Configuration errors are the only non-zero exit path. Report the
    // full picture once and abort.
    let config = match BridgeConfig::load(&cli_args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: invalid configuration: {}", e);
            error!(
                "please review {} and try again",
                cli_args.config.display()
            );
            std::process::exit(1);
        }
    };
    info!(
        brokers = config.listen.len(),
        channels = config.updates.len(),
        "configuration loaded"
    );

    // One broadcast channel drives the whole shutdown cascade.
    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    // The sender owns the per-channel field conversions; updaters only
    // ever see identifiers.
    let conversions: HashMap<String, FieldMapping> = config
        .updates
        .iter()
        .map(|update| (update.channel.name.clone(), update.mapping.clone()))
        .collect();
    let http_sender = Arc::new(HttpSender::new(conversions)?);

    let (dispatcher, dispatch) = Dispatcher::new(http_sender, shutdown_tx.subscribe());

    let updaters: Vec<SharedUpdater> = config
        .updates
        .iter()
        .map(|update| {
            info!(
                channel = %update.channel.name,
                interval_secs = update.update_interval.as_secs(),
                "channel updater created"
            );
            build_updater(update, dispatch.clone())
        })
        .collect();

    let (supervisor, event_tx) = Supervisor::new(updaters);

    let mut receiver_tasks = Vec::with_capacity(config.listen.len());
    for listen in config.listen {
        let receiver = BrokerReceiver::new(listen, event_tx.clone());
        receiver_tasks.push(tokio::spawn(receiver.run(shutdown_tx.subscribe())));
    }
    // The supervisor's queue must close once the receivers are gone.
    drop(event_tx);

    let supervisor_task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));
    let dispatcher_task = tokio::spawn(dispatcher.run());

    // Wait for SIGTERM / SIGINT (Ctrl+C elsewhere), then cascade.
    shutdown_signal().await;

    info!("shutting down");
    let _ = shutdown_tx.send(());

    // Supervisor first: it stops the updaters and their pending
    // executors, so nothing new reaches the dispatcher while it drains.
    let _ = supervisor_task.await;
    for task in receiver_tasks {
        let _ = task.await;
    }
    let _ = dispatcher_task.await;

    info!("mqspeak shutdown complete");
    Ok(())
}

/// Resolves when the process is asked to terminate.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C");
    }
}
