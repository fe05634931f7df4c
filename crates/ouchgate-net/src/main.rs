//! Ouchgate gateway.
//!
//! Accepts OUCH clients, forwards their orders to the engine and routes
//! acknowledgements from the engine's multicast feed back to them.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ouchgate_net::config::{
    CLIENT_BACKLOG_BYTES, MAX_EVENTS, MAX_MESSAGES_PER_CLIENT, MAX_REPLY_DATAGRAMS_PER_LOOP,
};
use ouchgate_net::{Gateway, GatewayConfig};
use ouchgate_proto::links;

#[derive(Parser, Debug, Clone)]
#[command(name = "ouchgate-gateway")]
#[command(about = "OUCH order-entry gateway", long_about = None)]
struct Cli {
    /// Client listener address
    #[arg(long, default_value_t = SocketAddr::V4(links::gateway_addr()))]
    listen: SocketAddr,

    /// Engine address
    #[arg(long, default_value_t = SocketAddr::V4(links::engine_addr()))]
    engine: SocketAddr,

    /// Acknowledgement multicast group (or unicast address)
    #[arg(long, default_value_t = links::multicast_addr())]
    feed: SocketAddrV4,

    /// Messages read per client per iteration
    #[arg(long, default_value_t = MAX_MESSAGES_PER_CLIENT)]
    max_messages_per_client: usize,

    /// Acknowledgement datagrams handled per iteration
    #[arg(long, default_value_t = MAX_REPLY_DATAGRAMS_PER_LOOP)]
    max_reply_datagrams: usize,

    /// Readiness events handled per wait
    #[arg(long, default_value_t = MAX_EVENTS)]
    max_events: usize,

    /// Reply bytes queued for a slow client before it is dropped
    #[arg(long, default_value_t = CLIENT_BACKLOG_BYTES)]
    client_backlog_bytes: usize,

    /// Readiness wait timeout in milliseconds
    #[arg(long, default_value_t = 1)]
    poll_timeout_ms: u64,

    /// Log level (RUST_LOG overrides)
    #[arg(short = 'l', long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            listen_addr: self.listen,
            engine_addr: self.engine,
            feed_addr: self.feed,
            max_messages_per_client: self.max_messages_per_client,
            max_reply_datagrams: self.max_reply_datagrams,
            max_events: self.max_events,
            client_backlog_bytes: self.client_backlog_bytes,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            ..GatewayConfig::default()
        }
    }
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

    let config = cli.into_config();
    info!(?config, "starting gateway");

    let mut gateway = Gateway::start(config).context("gateway startup failed")?;

    let result = gateway.run();
    let stats = gateway.stats();
    if let Err(ref e) = result {
        error!(error = %e, ?stats, "gateway terminated");
    }
    result.context("gateway failed")
}
