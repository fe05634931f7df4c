//! One load-test connection: its order stream, send schedule and the
//! acknowledgements verified so far.

use std::io::{self, Read, Write};
use std::mem::size_of;
use std::net::{SocketAddr, TcpStream};
use std::ops::Range;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;

use ouchgate_metrics::{LatencyHistogram, RawClock};
use ouchgate_proto::{
    side, EnterOrder, FrameMode, FrameParser, MessageType, OrderAccepted, OrderToken,
    MAX_MESSAGE_SIZE,
};

pub const TOKEN_PREFIX: &str = "LOAD_TEST";

/// Sequence numbers must fit the five digits after the prefix.
pub const MAX_MESSAGES: usize = 100_000;

const ORDER_SIZE: usize = size_of::<EnterOrder>();
const INBOX_BYTES: usize = 64 * MAX_MESSAGE_SIZE;

pub fn token_for(seq: usize) -> OrderToken {
    OrderToken::new(&format!("{TOKEN_PREFIX}{seq:05}"))
}

pub fn seq_of(token: &OrderToken) -> Option<usize> {
    token.as_str().strip_prefix(TOKEN_PREFIX)?.parse().ok()
}

/// The `seq`th order of client `client`. Fields vary so a mismatched
/// echo is caught.
pub fn order_for(client: usize, seq: usize) -> EnterOrder {
    const SIDES: [u8; 3] = [side::BUY, side::SELL, side::SHORT_SELL];
    EnterOrder::new(
        token_for(seq),
        client as u32,
        SIDES[seq % SIDES.len()],
        seq as u64 + 1,
        1_000 + seq as i32,
    )
}

/// Byte ranges written per send step.
///
/// With `partials` every step is one byte short, so frames straddle
/// writes, and a final step carries the leftover bytes.
pub fn send_plan(total: usize, sends: usize, partials: bool) -> Vec<Range<usize>> {
    let mut per_send = total / sends;
    if partials {
        per_send -= 1;
    }

    let mut plan: Vec<_> = (0..sends)
        .map(|i| i * per_send..(i + 1) * per_send)
        .collect();
    if partials {
        plan.push(sends * per_send..total);
    }
    plan
}

/// Index of the step whose write completes the byte ending at `end`.
pub fn completing_step(plan: &[Range<usize>], end: usize) -> usize {
    plan.partition_point(|range| range.end < end)
}

pub struct Session {
    index: usize,
    stream: TcpStream,
    payload: Vec<u8>,
    plan: Vec<Range<usize>>,
    sent_at: Vec<u64>,
    inbox: Vec<u8>,
    filled: usize,
    seen: Vec<bool>,
    received: usize,
    latency: LatencyHistogram,
}

impl Session {
    pub fn connect(
        index: usize,
        addr: SocketAddr,
        messages: usize,
        plan: Vec<Range<usize>>,
    ) -> Result<Self> {
        let stream =
            TcpStream::connect(addr).with_context(|| format!("client {index}: connect {addr}"))?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        let mut payload = Vec::with_capacity(messages * ORDER_SIZE);
        for seq in 0..messages {
            payload.extend_from_slice(bytemuck::bytes_of(&order_for(index, seq)));
        }

        Ok(Self {
            index,
            stream,
            payload,
            sent_at: Vec::with_capacity(plan.len()),
            plan,
            inbox: vec![0; INBOX_BYTES],
            filled: 0,
            seen: vec![false; messages],
            received: 0,
            latency: LatencyHistogram::new(),
        })
    }

    /// Write step `step` of the plan in full, verifying replies whenever
    /// the socket pushes back.
    pub fn send(&mut self, step: usize, clock: &RawClock) -> Result<()> {
        let Some(range) = self.plan.get(step).cloned() else {
            bail!("client {}: no send step {step}", self.index);
        };

        self.sent_at.push(clock.now());
        let mut pos = range.start;
        while pos < range.end {
            match self.stream.write(&self.payload[pos..range.end]) {
                Ok(0) => bail!("client {}: gateway closed while sending", self.index),
                Ok(n) => pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.poll(clock)?;
                    thread::sleep(Duration::from_micros(100));
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("client {}: send", self.index));
                }
            }
        }
        Ok(())
    }

    /// Read and verify every acknowledgement available now. Returns how
    /// many were verified.
    pub fn poll(&mut self, clock: &RawClock) -> Result<usize> {
        let mut verified = 0;
        loop {
            let n = match self.stream.read(&mut self.inbox[self.filled..]) {
                Ok(0) => bail!(
                    "client {}: gateway closed the connection after {} acknowledgements",
                    self.index,
                    self.received
                ),
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(verified),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("client {}: receive", self.index));
                }
            };
            self.filled += n;
            verified += self.verify(clock)?;
        }
    }

    fn verify(&mut self, clock: &RawClock) -> Result<usize> {
        let now = clock.now();
        let index = self.index;
        let data = &self.inbox[..self.filled];
        let mut frames = FrameParser::frames(data, FrameMode::Raw);
        let mut count = 0;

        for frame in frames.by_ref() {
            let frame = frame.with_context(|| format!("client {index}: malformed reply"))?;
            if frame.msg_type != MessageType::OrderAccepted {
                bail!("client {index}: unexpected {:?} from gateway", frame.msg_type);
            }

            let ack: OrderAccepted = bytemuck::pod_read_unaligned(frame.bytes(data));
            let token = ack.order_token;
            let seq = match seq_of(&token) {
                Some(seq) if seq < self.seen.len() => seq,
                _ => bail!("client {index}: acknowledgement for unknown token {token:?}"),
            };
            if std::mem::replace(&mut self.seen[seq], true) {
                bail!("client {index}: duplicate acknowledgement for {token}");
            }
            if !ack.matches(&order_for(index, seq)) {
                bail!("client {index}: acknowledgement fields differ from order: {ack:?}");
            }

            let step = completing_step(&self.plan, (seq + 1) * ORDER_SIZE);
            if let Some(&sent) = self.sent_at.get(step) {
                self.latency.record(clock.delta_as_nanos(sent, now));
            }
            count += 1;
        }

        let consumed = frames.consumed();
        self.inbox.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;
        self.received += count;

        debug!(client = index, verified = count, total = self.received, "acknowledgements");
        Ok(count)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn expected(&self) -> usize {
        self.seen.len()
    }

    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_token_sequence() {
        let token = token_for(42);
        assert_eq!(token.as_str(), "LOAD_TEST00042");
        assert_eq!(seq_of(&token), Some(42));
        assert_eq!(seq_of(&token_for(MAX_MESSAGES - 1)), Some(MAX_MESSAGES - 1));
        assert_eq!(seq_of(&OrderToken::new("OTHER")), None);
    }

    #[test]
    fn test_orders_differ_per_client() {
        let a = order_for(0, 3);
        let b = order_for(1, 3);
        assert!(!a.accept().matches(&b));
        assert!(a.accept().matches(&order_for(0, 3)));

        let sides: Vec<u8> = (0..3).map(|seq| order_for(0, seq).side).collect();
        assert_eq!(sides, [side::BUY, side::SELL, side::SHORT_SELL]);
    }

    #[test]
    fn test_plan_without_partials() {
        let plan = send_plan(10 * ORDER_SIZE, 5, false);
        assert_eq!(plan.len(), 5);
        assert!(plan.iter().all(|r| r.len() == 2 * ORDER_SIZE));
        assert_eq!(plan.last().map(|r| r.end), Some(10 * ORDER_SIZE));
    }

    #[test]
    fn test_plan_with_partials() {
        let total = 10 * ORDER_SIZE;
        let plan = send_plan(total, 5, true);

        assert_eq!(plan.len(), 6);
        // Contiguous and complete.
        for pair in plan.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(plan[0].start, 0);
        assert_eq!(plan[5].end, total);
        // Leftover is one byte per short step.
        assert_eq!(plan[5].len(), 5);
        // Every short step splits a frame.
        assert!(plan[..5].iter().all(|r| r.end % ORDER_SIZE != 0));
    }

    #[test]
    fn test_completing_step() {
        let plan = send_plan(4 * ORDER_SIZE, 2, true);
        // First order ends inside step 0.
        assert_eq!(completing_step(&plan, ORDER_SIZE), 0);
        // Second order's last byte is held back to step 1.
        assert_eq!(completing_step(&plan, 2 * ORDER_SIZE), 1);
        // Last order completes in the leftover step.
        assert_eq!(completing_step(&plan, 4 * ORDER_SIZE), 2);
    }

    #[test]
    fn test_session_verifies_replies() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let plan = send_plan(2 * ORDER_SIZE, 1, false);

        let mut session = Session::connect(4, addr, 2, plan).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        let clock = RawClock::new();
        session.send(0, &clock).unwrap();

        let mut orders = [0u8; 2 * ORDER_SIZE];
        peer.read_exact(&mut orders).unwrap();

        // Reply out of order, the second one split across writes.
        let second = order_for(4, 1).accept();
        let first = order_for(4, 0).accept();
        peer.write_all(&bytemuck::bytes_of(&second)[..10]).unwrap();
        peer.write_all(&bytemuck::bytes_of(&second)[10..]).unwrap();
        peer.write_all(bytemuck::bytes_of(&first)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while session.received() < 2 {
            assert!(std::time::Instant::now() < deadline, "replies never verified");
            session.poll(&clock).unwrap();
        }
        assert_eq!(session.latency().count(), 2);

        // A repeat is a duplicate.
        peer.write_all(bytemuck::bytes_of(&first)).unwrap();
        let err = loop {
            match session.poll(&clock) {
                Ok(_) => assert!(std::time::Instant::now() < deadline, "duplicate missed"),
                Err(e) => break e,
            }
        };
        assert!(err.to_string().contains("duplicate"));
    }
}
