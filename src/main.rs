use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use smppgw::bootstrap::Bridge;
use smppgw::config::Config;
use smppgw::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "smppgw")]
#[command(author, version, about = "HTTP/SMPP SMS bridge")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config errors must exit 1 before any logging is up
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("smppgw: {e:#}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        peers = config.smpp_peers.len(),
        "starting smppgw"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    let bridge = Bridge::start(config).await?;
    bridge.run().await
}
