//! Protocol peer for exercising a running balancer.
//!
//! Connects to the balancer, sends one handshake frame, then a bounded
//! number of data frames with pseudorandom payloads at a fixed interval,
//! and finally shuts down its write side. It never reads.

use crate::codec::{self, Frame};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Command-line arguments for the protocol peer
#[derive(Parser, Debug, Clone)]
#[command(name = "tcp-peer")]
#[command(version = "0.1.0")]
#[command(about = "Sends a handshake and a stream of data frames to a balancer", long_about = None)]
pub struct PeerArgs {
    /// Balancer host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Balancer port
    #[arg(short, long, default_value_t = 7000)]
    pub port: u16,

    /// Client identifier sent in the handshake
    #[arg(short = 'i', long)]
    pub client_id: u32,

    /// Number of data frames to send
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub count: u32,

    /// Delay between data frames in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Seed for payload generation (random if omitted)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// What the peer sends once connected.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub client_id: u32,
    pub count: u32,
    pub interval: Duration,
}

impl From<&PeerArgs> for Pacing {
    fn from(args: &PeerArgs) -> Self {
        Self {
            client_id: args.client_id,
            count: args.count,
            interval: Duration::from_millis(args.interval_ms),
        }
    }
}

/// Connect to the balancer and send the configured frames.
pub async fn run(args: PeerArgs) -> io::Result<u32> {
    info!(
        client_id = args.client_id,
        host = %args.host,
        port = args.port,
        "Start client"
    );

    let mut stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    stream.set_nodelay(true)?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    send_frames(&mut stream, Pacing::from(&args), || rng.random()).await
}

/// Write the handshake, then `count` data frames paced by `interval`.
///
/// Returns the number of data frames written.
pub async fn send_frames<W>(
    writer: &mut W,
    pacing: Pacing,
    mut next_payload: impl FnMut() -> u32,
) -> io::Result<u32>
where
    W: AsyncWrite + Unpin,
{
    let handshake = codec::encode(&Frame::Handshake {
        client_id: pacing.client_id,
    });
    writer.write_all(&handshake).await?;

    // First tick completes immediately
    let mut ticker = tokio::time::interval(pacing.interval);
    for n in 0..pacing.count {
        ticker.tick().await;
        let payload = next_payload();
        writer
            .write_all(&codec::encode(&Frame::Data { payload }))
            .await?;
        debug!(message = n, payload, "Send next message");
    }

    writer.shutdown().await?;
    info!(sent = pacing.count, "Last message was sent");
    Ok(pacing.count)
}
