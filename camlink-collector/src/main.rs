//! camlink collector — entry point.
//!
//! ```text
//! camlink-collector                        Run with camlink-collector.toml (or defaults)
//! camlink-collector --config <path>        Load a custom config TOML
//! camlink-collector --receive-dir <dir>    Override where data is stored
//! camlink-collector --gen-config           Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use camlink_collector::config::CollectorConfig;
use camlink_collector::server::CollectorServer;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "camlink-collector", about = "Receive camlink streams and transfers")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "camlink-collector.toml")]
    config: PathBuf,

    /// Directory for received data, overriding the config file.
    #[arg(long)]
    receive_dir: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&CollectorConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = CollectorConfig::load(&cli.config);
    if let Some(dir) = cli.receive_dir {
        config.storage.receive_dir = dir.to_string_lossy().into_owned();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("camlink-collector v{}", env!("CARGO_PKG_VERSION"));
    info!("receive dir: {}", config.storage.receive_dir);

    let server = CollectorServer::bind(&config).await?;
    let stop = server.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    server.run().await;
    Ok(())
}
