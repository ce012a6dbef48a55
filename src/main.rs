//! See `lib.rs` for documentation.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::time::Duration;

use robot_bridge::BridgeConfig;
use robot_bridge::config::{DEFAULT_BAUD_RATE, DEFAULT_PREFERRED_DEVICE};

/// Control panel bridge for a serial-attached companion robot.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// The address to accept control panel connections on.
    #[arg(long, default_value = "0.0.0.0:5000")]
    listen: SocketAddr,

    /// The baud rate of the robot's serial link.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// The device selected by default is the first whose description contains this text.
    #[arg(long, default_value = DEFAULT_PREFERRED_DEVICE)]
    preferred_device: String,

    /// How long the link worker sleeps per iteration while a video is playing, in milliseconds.
    #[arg(long, default_value_t = 100)]
    backpressure_ms: u64,

    /// Do not connect to the preferred device at start-up.
    #[arg(long)]
    no_auto_connect: bool,

    /// Log debug output. `RUST_LOG` takes precedence.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = BridgeConfig {
        baud_rate: args.baud,
        preferred_device: args.preferred_device,
        backpressure_interval: Duration::from_millis(args.backpressure_ms),
        ..Default::default()
    };

    robot_bridge::launch(args.listen, config, !args.no_auto_connect).await;
}
