//! mpc-presence
//!
//! Mirrors Media Player Classic playback into Discord Rich Presence.
//! Polls the MPC web interface, optionally uploads a thumbnail of the
//! current frame, and keeps a Discord IPC session alive across restarts
//! of either side.

mod bridge;
mod config;
mod logging;
mod media;
mod presence;
mod rpc;
mod shutdown;
mod upload;

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use bridge::{create_bridge_channels, Bridge, Collaborators};
use config::Config;
use media::{HttpMediaSource, MediaSource};
use presence::MpcPresence;
use rpc::DiscordConnector;
use upload::{ImageHostPipeline, SnapshotPipeline};

/// Command line options
#[derive(Debug, Default)]
struct Args {
    port: Option<u16>,
    config: Option<PathBuf>,
}

fn main() {
    if let Err(e) = run() {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    if raw.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let args = parse_args(&raw)?;

    let _log_guard = logging::init_logging()?;
    info!("mpc-presence {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Configuration loaded from {:?}", config.config_path());

    if let Some(port) = args.port {
        config.media.port = Some(port);
    }
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (cmd_tx, cmd_rx) = create_bridge_channels();
        shutdown::spawn_listener(cmd_tx.clone());

        let mut bridge = Bridge::new(&config.timing, build_collaborators(&config), cmd_rx);
        bridge.run().await;

        // Held until here so the command channel cannot close under the bridge
        drop(cmd_tx);
    });

    info!("Shutdown complete");
    Ok(())
}

fn build_collaborators(config: &Config) -> Collaborators {
    let client = reqwest::Client::new();
    let media: Arc<dyn MediaSource> =
        Arc::new(HttpMediaSource::with_client(client.clone(), config));

    let api_key = config
        .snapshot
        .api_key
        .clone()
        .filter(|_| config.snapshots_enabled());
    let snapshots: Option<Arc<dyn SnapshotPipeline>> = match api_key {
        Some(api_key) => Some(Arc::new(ImageHostPipeline::new(
            media.clone(),
            client,
            config.snapshot.upload_endpoint.clone(),
            api_key,
            config.snapshot.max_edge,
        ))),
        None => {
            info!("Snapshot uploads disabled (see [snapshot] in the config file)");
            None
        }
    };

    Collaborators {
        media,
        snapshots,
        connector: Arc::new(DiscordConnector::new(config.discord.app_id)),
        presence: Box::new(MpcPresence::new(
            config.presence.clone(),
            config.timing.fast_poll(),
        )),
    }
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut args = Args::default();
    let mut iter = raw.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-p" | "--port" => {
                let value = iter.next().context("--port needs a value")?;
                let port = value
                    .parse::<u16>()
                    .with_context(|| format!("Invalid port: {}", value))?;
                args.port = Some(port);
            }
            "-c" | "--config" => {
                let value = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(value));
            }
            other => bail!("Unknown argument: {} (try --help)", other),
        }
    }

    Ok(args)
}

fn print_help() {
    println!("mpc-presence - Media Player Classic status in Discord Rich Presence");
    println!();
    println!("USAGE:");
    println!("    mpc-presence [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help            Print this help message");
    println!("    -p, --port <PORT>     MPC web interface port (overrides the config file)");
    println!("    -c, --config <PATH>   Use this config file instead of the default one");
    println!();
    println!("SNAPSHOTS:");
    println!("    Thumbnails of the current frame are uploaded to imgcdn.dev every two");
    println!("    minutes using the public key. Set [snapshot] api_key in the config");
    println!("    file to use your own key, or enabled = false to turn uploads off.");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                 Set log level (e.g., debug, info, warn)");
    println!("    MPC_PRESENCE_LOG_PATH    Directory for log files");
}
