//! camlink sender — entry point.
//!
//! ```text
//! camlink-sender                    Run with camlink-sender.toml (or defaults)
//! camlink-sender --config <path>    Load a custom config TOML
//! camlink-sender --host 10.0.0.2    Override the collector host
//! camlink-sender --mode clip        Override the capture mode
//! camlink-sender --gen-config       Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use camlink_core::CaptureMode;
use camlink_sender::config::{SenderConfig, parse_mode};
use camlink_sender::service::{SenderService, ServiceExit};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "camlink-sender", about = "Stream both cameras to a camlink collector")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "camlink-sender.toml")]
    config: PathBuf,

    /// Collector host, overriding the config file.
    #[arg(long)]
    host: Option<String>,

    /// Capture mode: stream, photo or clip.
    #[arg(long, value_parser = parse_mode)]
    mode: Option<CaptureMode>,

    /// Treat this start as operator-requested (fatal errors exit non-zero).
    #[arg(long)]
    manual: bool,

    /// Restart automatically after retries are exhausted.
    #[arg(long)]
    restart_on_failure: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&SenderConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = SenderConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.network.host = host;
    }
    if let Some(mode) = cli.mode {
        config.capture.mode = mode;
    }
    if cli.manual {
        config.capture.manual_start = true;
    }
    if cli.restart_on_failure {
        config.retry.restart_on_failure = true;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("camlink-sender v{}", env!("CARGO_PKG_VERSION"));
    info!("collector: {}", config.network.host);
    info!(
        "ports: rear {} / front {}",
        config.network.rear_port, config.network.front_port
    );
    info!("mode: {}", config.capture.mode);

    let service = SenderService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    match service.run().await {
        Ok(ServiceExit::Exhausted) => {
            error!("collector unreachable, giving up");
            std::process::exit(2);
        }
        Ok(exit) => {
            info!(?exit, "done");
            Ok(())
        }
        Err(e) => {
            error!("sender failed: {e}");
            Err(e.into())
        }
    }
}
