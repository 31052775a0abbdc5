//! Farview render host — entry point.
//!
//! ```text
//! farview-host                  Run in the foreground
//! farview-host --config <path>  Load a custom config TOML
//! farview-host --gen-config     Print the default config to stdout
//! ```
//!
//! Attaches to a browser started with remote debugging (for example
//! `chromium --headless --remote-debugging-port=9222`), loads the
//! configured page, registers with the relay, and streams frames.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use farview_core::{ProducerService, spawn_driver};

mod config;
mod surface;
use config::HostConfig;
use surface::CdpSurface;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "farview-host", about = "Farview render host and frame producer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "farview-host.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = HostConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("farview-host v{}", env!("CARGO_PKG_VERSION"));
    info!("relay: {}", config.relay.addr);
    info!("target page: {}", config.producer.target_url);
    info!(
        "capture: {}x{} every {} ms",
        config.capture.width, config.capture.height, config.capture.interval_ms
    );

    let cdp = CdpSurface::connect(&config.browser.devtools_url).await?;
    let (handle, _driver) = spawn_driver(cdp);

    let service = ProducerService::new(config.to_producer_config(), handle);

    tokio::select! {
        result = service.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received — shutting down");
        }
    }

    Ok(())
}
