//! Ouchgate load client.
//!
//! Opens N connections to the gateway, pushes K entry orders on each in
//! a configurable number of writes (optionally splitting frames across
//! writes), then verifies every connection gets exactly K matching
//! acknowledgements and reports round-trip latency.

mod session;

use std::mem::size_of;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ouchgate_metrics::{LatencyHistogram, RawClock};
use ouchgate_proto::{links, EnterOrder};

use session::{send_plan, Session, MAX_MESSAGES};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug, Clone)]
#[command(name = "ouchgate-load")]
#[command(about = "Load generator and verifier for the OUCH gateway", long_about = None)]
struct Cli {
    /// Gateway client address
    #[arg(long, default_value_t = SocketAddr::V4(links::gateway_addr()))]
    gateway: SocketAddr,

    /// Number of connections
    #[arg(short, long, default_value_t = 1)]
    clients: usize,

    /// Orders sent on each connection
    #[arg(short, long, default_value_t = 1000)]
    messages: usize,

    /// Orders per write (must divide --messages)
    #[arg(short, long, default_value_t = 10)]
    packet_hint: usize,

    /// Make every write one byte short so frames straddle writes
    #[arg(long)]
    partials: bool,

    /// Pause between send rounds in milliseconds
    #[arg(long, default_value_t = 50)]
    send_interval_ms: u64,

    /// Give up waiting for acknowledgements after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Keep listening this long after the last acknowledgement to catch duplicates
    #[arg(long, default_value_t = 100)]
    linger_ms: u64,

    /// Log level (RUST_LOG overrides)
    #[arg(short = 'l', long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,
}

impl Cli {
    fn validate(&self) -> Result<()> {
        ensure!(self.clients > 0, "--clients must be at least 1");
        ensure!(
            (1..=MAX_MESSAGES).contains(&self.messages),
            "--messages must be between 1 and {MAX_MESSAGES}"
        );
        ensure!(
            self.packet_hint > 0 && self.messages % self.packet_hint == 0,
            "--messages must be divisible by --packet-hint"
        );
        Ok(())
    }

    fn sends(&self) -> usize {
        self.messages / self.packet_hint
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Poll every session once. Returns (acknowledgements so far, any progress).
fn poll_all(sessions: &mut [Session], clock: &RawClock) -> Result<(usize, bool)> {
    let mut received = 0;
    let mut progressed = false;
    for session in sessions.iter_mut() {
        progressed |= session.poll(clock)? > 0;
        received += session.received();
    }
    Ok((received, progressed))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    cli.validate()?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                     OUCHGATE LOAD CLIENT                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let plan = send_plan(
        cli.messages * size_of::<EnterOrder>(),
        cli.sends(),
        cli.partials,
    );

    println!("[1/3] Connecting {} clients to {}...", cli.clients, cli.gateway);
    let mut sessions = (0..cli.clients)
        .map(|index| Session::connect(index, cli.gateway, cli.messages, plan.clone()))
        .collect::<Result<Vec<_>>>()?;

    let clock = RawClock::new();
    let start = Instant::now();
    let interval = Duration::from_millis(cli.send_interval_ms);

    println!(
        "[2/3] Sending {} orders per client in {} writes{}...",
        cli.messages,
        plan.len(),
        if cli.partials { " (split frames)" } else { "" }
    );
    for step in 0..plan.len() {
        for session in &mut sessions {
            session.send(step, &clock)?;
        }
        poll_all(&mut sessions, &clock)?;
        thread::sleep(interval);
    }
    let send_elapsed = start.elapsed();

    println!("[3/3] Awaiting acknowledgements...");
    let expected = cli.clients * cli.messages;
    let deadline = Instant::now() + Duration::from_secs(cli.timeout_secs);
    let mut last_progress = Instant::now();
    loop {
        let (received, progressed) = poll_all(&mut sessions, &clock)?;
        if received == expected {
            break;
        }
        if Instant::now() >= deadline {
            for session in sessions.iter().filter(|s| s.received() < s.expected()) {
                info!(
                    client = session.index(),
                    received = session.received(),
                    expected = session.expected(),
                    "incomplete"
                );
            }
            bail!("timed out with {received} of {expected} acknowledgements");
        }
        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            info!(received, expected, "waiting for acknowledgements");
            last_progress = Instant::now();
        }
        if !progressed {
            thread::sleep(Duration::from_micros(200));
        }
    }
    let elapsed = start.elapsed();

    // Anything arriving now is a duplicate and fails verification.
    let linger = Instant::now() + Duration::from_millis(cli.linger_ms);
    while Instant::now() < linger {
        poll_all(&mut sessions, &clock)?;
        thread::sleep(Duration::from_millis(1));
    }

    let mut latency = LatencyHistogram::new();
    for session in &sessions {
        latency.merge(session.latency());
    }

    let rate = expected as f64 / elapsed.as_secs_f64();

    println!("   Sent in {:.2?}, all acknowledged in {:.2?}", send_elapsed, elapsed);
    latency.print_summary("   Round-trip");

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                          LOAD SUMMARY                        ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Clients:         {:>12}                               ║", cli.clients);
    println!("║  Orders/client:   {:>12}                               ║", cli.messages);
    println!("║  Writes/client:   {:>12}                               ║", plan.len());
    println!("║  Acknowledged:    {:>12}                               ║", expected);
    println!("║  Throughput:      {:>12.0} acks/sec                      ║", rate);
    println!("║  P50 round-trip:  {:>12}                               ║", LatencyHistogram::format_latency(latency.p50()));
    println!("║  P99 round-trip:  {:>12}                               ║", LatencyHistogram::format_latency(latency.p99()));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("✅ PASS: every order acknowledged exactly once with matching fields");

    Ok(())
}
