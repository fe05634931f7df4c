//! Ouchgate engine stub.
//!
//! Waits for the gateway, then accepts every order it forwards and
//! publishes the acknowledgement on the feed.

use std::net::{SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ouchgate_engine::reflector::GATEWAY_RECV_BYTES;
use ouchgate_engine::{EngineServer, Reflector};
use ouchgate_feed::Publisher;
use ouchgate_proto::links;

#[derive(Parser, Debug, Clone)]
#[command(name = "ouchgate-engine")]
#[command(about = "Order acknowledgement engine", long_about = None)]
struct Cli {
    /// Address the gateway connects to
    #[arg(long, default_value_t = SocketAddr::V4(links::engine_addr()))]
    listen: SocketAddr,

    /// Acknowledgement multicast group (or unicast address)
    #[arg(long, default_value_t = links::multicast_addr())]
    feed: SocketAddrV4,

    /// Gateway receive buffer in bytes
    #[arg(long, default_value_t = GATEWAY_RECV_BYTES)]
    recv_bytes: usize,

    /// Log level (RUST_LOG overrides)
    #[arg(short = 'l', long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let publisher = Publisher::new(cli.feed)
        .with_context(|| format!("failed to open feed publisher for {}", cli.feed))?;
    let mut reflector = Reflector::with_capacity(publisher, cli.recv_bytes);

    let server = EngineServer::bind(cli.listen)
        .with_context(|| format!("failed to listen on {}", cli.listen))?;
    info!(
        listen = %cli.listen,
        feed = %reflector.publisher().dest_addr(),
        "engine awaiting gateway"
    );

    let gateway = server.accept_gateway().context("gateway handshake failed")?;
    let peer = gateway.peer();
    gateway.run(&mut reflector).context("engine failed")?;

    info!(
        gateway = %peer,
        reflected = reflector.reflected(),
        skipped = reflector.skipped(),
        published = reflector.publisher().published(),
        "engine stopped"
    );
    Ok(())
}
