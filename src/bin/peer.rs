//! tcp-peer: sends one handshake and a paced stream of data frames.

use clap::Parser;
use tcp_balancer::peer::{self, PeerArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = PeerArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    peer::run(args).await?;
    Ok(())
}
