//! UltraRDP daemon
//!
//! One binary, two modes: `--server` captures and streams the configured
//! monitors; the default client mode connects, receives and presents.
//! Exit status is zero on clean shutdown (ctrl-c or all presenters
//! closed) and non-zero on bind, connect or handshake failure.

mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::Config;
use std::path::PathBuf;
use tracing::info;
use ultrardp_protocol::capture::{FrameSource, PatternSource};
use ultrardp_protocol::client::{Client, HeadlessPresenter, Presenter};
use ultrardp_protocol::server::{Server, StreamSettings};
use ultrardp_protocol::Shutdown;

/// UltraRDP command-line interface
#[derive(Parser, Debug)]
#[command(name = "ultrardp")]
#[command(about = "Multi-monitor remote desktop streaming", long_about = None)]
#[command(version)]
struct Cli {
    /// Run as server: capture and stream the configured monitors
    #[arg(long)]
    server: bool,

    /// Run as client (the default)
    #[arg(long)]
    client: bool,

    /// Address to listen on (server) or connect to (client)
    #[arg(long, value_name = "HOST:PORT")]
    address: Option<String>,

    /// Log level used when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Path to a JSON configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.server && cli.client {
        bail!("--server and --client are mutually exclusive");
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(address) = &cli.address {
        config.address = address.clone();
    }

    if cli.server {
        run_server(config).await
    } else {
        run_client(config).await
    }
}

fn init_logging(cli: &Cli) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();
}

/// Signal the stop handle on ctrl-c
fn watch_for_stop(shutdown: Shutdown) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested");
            shutdown.signal();
        }
    });
}

async fn run_server(config: Config) -> Result<()> {
    let layout = config.display.to_monitor_config();
    let settings = StreamSettings {
        target_fps: config.stream.target_fps,
        default_quality: config.stream.default_quality,
    };

    let server = Server::bind(&config.address, layout.clone(), settings)
        .await
        .with_context(|| format!("failed to listen on {}", config.address))?;
    info!(
        address = %config.address,
        monitors = layout.count(),
        "UltraRDP server started"
    );

    watch_for_stop(server.shutdown_handle());

    server
        .run(move || Box::new(PatternSource::new(layout.clone())) as Box<dyn FrameSource>)
        .await?;
    Ok(())
}

async fn run_client(config: Config) -> Result<()> {
    let local_monitors = config.display.to_monitor_config();

    let client = Client::connect(&config.address, local_monitors.clone())
        .await
        .with_context(|| format!("failed to connect to {}", config.address))?;
    info!(
        address = %config.address,
        server_monitors = client.server_monitors().count(),
        mapped = client.monitor_map().len(),
        "UltraRDP client started"
    );

    watch_for_stop(client.shutdown_handle());

    let presenters: Vec<Box<dyn Presenter>> = local_monitors
        .monitors
        .iter()
        .map(|monitor| {
            let presenter = match &config.display.frame_dump_dir {
                Some(dir) => HeadlessPresenter::new(monitor.id)
                    .with_frame_dump(dir.clone(), config.display.frame_dump_every),
                None => HeadlessPresenter::new(monitor.id),
            };
            Box::new(presenter) as Box<dyn Presenter>
        })
        .collect();

    client.run(presenters).await?;
    Ok(())
}
