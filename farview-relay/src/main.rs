//! Farview relay — entry point.
//!
//! ```text
//! farview-relay                  Run in the foreground
//! farview-relay --config <path>  Load a custom config TOML
//! farview-relay --gen-config     Print the default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use farview_core::relay::RelayServer;

mod config;
use config::RelayConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "farview-relay", about = "Farview frame relay and session broker")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "farview-relay.toml")]
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
        let text = toml::to_string_pretty(&RelayConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = RelayConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("farview-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("bind address: {}", config.bind_addr());

    let server = RelayServer::bind(&config.bind_addr()).await?;
    let stop = server.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    server.run().await?;

    Ok(())
}
