//! # beacon
//!
//! Beacon binary: `serve` runs the heartbeat server, `probe` connects to one
//! as a client and logs latency samples.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use beacon_client::{ClientConfig, SubscriptionMultiplexer, WsTransport};
use beacon_core::Identifiers;
use beacon_core::logging::init_subscriber;
use beacon_server::metrics::install_recorder;
use beacon_server::{BeaconServer, ServerConfig};
use beacon_settings::{BeaconSettings, load_settings, load_settings_from_path};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Beacon connection-liveness server and probe.
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "Beacon heartbeat server and probe client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket server.
    Serve(ServeArgs),
    /// Connect to a server and log heartbeat latency until Ctrl-C.
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.beacon/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Heartbeat tick period in milliseconds (overrides settings).
    #[arg(long)]
    beat_interval_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Server URL, e.g. `ws://127.0.0.1:8080/cable`.
    url: String,

    /// Subscription identifier to attach.
    #[arg(long, default_value = "probe")]
    identifier: String,

    /// Settings file for the protocol list and beat interval.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Heartbeat tick period in milliseconds (overrides settings).
    #[arg(long)]
    beat_interval_ms: Option<u64>,
}

fn load(config: Option<&PathBuf>) -> Result<BeaconSettings> {
    match config {
        Some(path) => {
            if !path.exists() {
                bail!("settings file not found: {}", path.display());
            }
            load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        }
        None => load_settings().context("Failed to load settings"),
    }
}

fn apply_serve_overrides(settings: &mut BeaconSettings, args: &ServeArgs) -> Result<()> {
    if let Some(host) = &args.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(ms) = args.beat_interval_ms {
        settings.heartbeat.beat_interval_ms = ms;
    }
    settings.validate().context("Invalid command-line overrides")
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut settings = load(args.config.as_ref())?;
    apply_serve_overrides(&mut settings, &args)?;
    init_subscriber(&settings.logging.level, settings.logging.json);

    let config = ServerConfig::from_settings(&settings).context("Invalid server settings")?;
    let metrics = install_recorder().context("Failed to install metrics recorder")?;
    let server = BeaconServer::new(config).with_metrics(metrics);
    let handle = server.listen().await.context("Failed to bind server")?;
    info!(
        "beacon listening on {}",
        handle.ws_url(&server.config().path)
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    let closed = server.shutdown().await;
    handle.stopped().await;
    info!(closed, "shutdown complete");
    Ok(())
}

async fn probe(args: ProbeArgs) -> Result<()> {
    let mut settings = load(args.config.as_ref())?;
    if let Some(ms) = args.beat_interval_ms {
        settings.heartbeat.beat_interval_ms = ms;
        settings.validate().context("Invalid command-line overrides")?;
    }
    init_subscriber(&settings.logging.level, settings.logging.json);

    let config = ClientConfig {
        protocols: settings.protocol_set().context("Invalid protocol list")?,
        beat_interval: Duration::from_millis(settings.heartbeat.beat_interval_ms),
        negative_latency: settings.heartbeat.negative_latency,
        identifiers: Identifiers::from([("probe".to_string(), args.identifier.clone())]),
    };
    let transport = Arc::new(WsTransport::new(args.url.clone()));
    let mux = SubscriptionMultiplexer::new(config, transport).spawn();
    let mut frames = mux.frames();

    let id = mux
        .attach(args.identifier.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", args.url))?;
    info!(url = %args.url, sub_id = %id, "probe attached");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            frame = frames.recv() => match frame {
                Ok(text) => info!(frame = %text, "server frame"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "frame log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Err(err) = mux.detach(&id).await {
        warn!(error = %err, "detach failed");
    }
    mux.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Probe(args) => probe(args).await,
    }
}
