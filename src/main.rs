#[macro_use]
extern crate log;

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use env_logger::Env;
use mfc_rs::{config::Config, grabber::Grabber};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "mfc-rs")]
#[command(author, version, about = "Capture MyFreeCams streams while the broadcasters are live")]
struct Args {
    /// Broadcasters to watch
    #[arg(required = true)]
    models: Vec<String>,

    /// Directory the captures are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Seconds between status reports
    #[arg(long, default_value = "6")]
    status_interval: u64,

    /// Broken chunks tolerated before a capture is given up
    #[arg(long, default_value = "5")]
    max_broken_chunks: usize,

    /// Attempts at loading a stream playlist
    #[arg(long, default_value = "10")]
    manifest_attempts: usize,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // The chat connection needs a process-wide rustls provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let args = Args::parse();

    let mut config = Config::default();
    config.status_interval = Duration::from_secs(args.status_interval.max(1));
    config.capture.output_dir = args.output_dir;
    config.capture.max_broken_chunks = args.max_broken_chunks;
    config.capture.max_manifest_attempts = args.manifest_attempts;

    let mut grabber = match Grabber::new(args.models, config) {
        Ok(grabber) => grabber,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted");
                trigger.cancel();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    if let Err(e) = grabber.run(shutdown).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
