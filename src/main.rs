//! tcp-balancer: routes client sessions to per-client backends.
//!
//! Features:
//! - Fixed-width binary handshake and data frames
//! - Static route table from a TOML file or `--route` flags
//! - Single-threaded mio reactor with bounded per-backend queues
//! - Configuration via CLI arguments or TOML file

use tcp_balancer::config::Config;
use tcp_balancer::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        routes = config.routes.len(),
        max_sessions = config.max_sessions,
        "Starting tcp-balancer"
    );

    runtime::run(config)?;
    Ok(())
}
