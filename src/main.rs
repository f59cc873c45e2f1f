use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tsmonitor::{
    config::{defaults::DEFAULT_CONFIG_PATH, Config},
    metrics::MetricsSink,
    models::StreamTarget,
    parser::parse_report,
    services::{FleetCoordinator, StreamSupervisor},
    signals::ShutdownSignals,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "tsmonitor")]
#[command(version)]
#[command(about = "Multicast MPEG-TS monitor exporting TSDuck analysis as Prometheus metrics")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Metrics port (overrides config file)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Receive interface address (overrides config file)
    #[arg(short, long, value_name = "ADDR")]
    interface: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor every configured stream and serve metrics (default)
    Run,
    /// Run the analyzer once against a single feed and print the snapshot
    Probe {
        /// Multicast address and port, e.g. 233.198.134.1:3333
        feed: String,
    },
    /// Parse a captured analyzer report and print the snapshot
    Parse {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("tsmonitor={},tower_http=trace", cli.log_level)
    } else {
        format!("tsmonitor={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Some(Command::Parse { ref file }) => parse_file(file),
        Some(Command::Probe { ref feed }) => {
            let config = load_config(&cli)?;
            probe(&config, feed).await
        }
        Some(Command::Run) | None => {
            let config = load_config(&cli)?;
            run(config).await
        }
    }
}

/// Read the config file and apply command line overrides before validating
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::read_file(&cli.config)?;
    if let Some(port) = cli.port {
        config.metrics_port = u32::from(port);
    }
    if let Some(interface) = &cli.interface {
        config.interface = interface.clone();
    }
    config.validate()?;

    info!(
        "Configuration loaded from {}: {} streams on {}",
        cli.config.display(),
        config.stream_count(),
        config.interface
    );
    Ok(config)
}

async fn run(config: Config) -> Result<()> {
    info!("Starting tsmonitor v{}", env!("CARGO_PKG_VERSION"));

    let sink = Arc::new(MetricsSink::new()?);
    let fleet = Arc::new(FleetCoordinator::new(&config, sink.clone()));
    let token = CancellationToken::new();

    let server = WebServer::new(
        config.metrics_addr()?,
        AppState {
            sink,
            fleet: fleet.clone(),
        },
    );
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let server_token = token.clone();
    let server_task =
        tokio::spawn(async move { server.serve_with_cancellation(ready_tx, server_token).await });

    ready_rx
        .await
        .context("web server task ended before binding")??;

    fleet.start(&token).await?;

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = token.cancelled() => {}
    }

    info!("Shutting down");
    token.cancel();
    fleet.stop().await;

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Web server error: {}", e),
        Err(e) => error!("Web server task failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}

async fn probe(config: &Config, feed: &str) -> Result<()> {
    let target = config
        .target_for(feed)
        .unwrap_or_else(|| StreamTarget::new(feed, feed, config.interface.as_str()));

    info!(
        "Probing {} for {}",
        target,
        humantime::format_duration(config.timeout)
    );
    let supervisor = StreamSupervisor::for_target(target, config.supervisor.clone());

    match supervisor.probe(config.timeout).await? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        None => {
            warn!("No report received within {}", humantime::format_duration(config.timeout));
            anyhow::bail!("no analyzer report for {feed}")
        }
    }
}

fn parse_file(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let name = file.display().to_string();
    let target = StreamTarget::new(name.as_str(), name.as_str(), "");
    let snapshot = parse_report(&text, &target)?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn shutdown_signal() {
    match ShutdownSignals::install() {
        Ok(mut signals) => {
            let name = signals.recv().await;
            info!("Received {}, shutting down gracefully", name);
        }
        Err(e) => {
            warn!("Failed to install signal handlers: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down gracefully");
        }
    }
}
