//! Gateway event loop.
//!
//! A single-threaded mio multiplexer over the client listener, every
//! client socket, the engine link and the acknowledgement feed. Each
//! iteration accepts new clients, forwards complete client orders to
//! the engine in one staged write, then routes acknowledgements back.

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use ouchgate_feed::Subscriber;
use ouchgate_proto::envelope;
use ouchgate_proto::{FrameMode, FrameParser, MessageType, ParseError};

use crate::client::{client_of, ClientId, ClientTable, RecvState};
use crate::config::{GatewayConfig, REPLY_DATAGRAM_BYTES};
use crate::error::GatewayError;
use crate::link::EngineLink;

const LISTENER: Token = Token(0);
const FEED: Token = Token(1);
const ENGINE: Token = Token(2);

/// Running counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub accepted: u64,
    pub disconnected: u64,
    pub orders_forwarded: u64,
    pub replies_delivered: u64,
    pub stray_replies: u64,
    pub protocol_violations: u64,
}

/// Order-entry gateway.
pub struct Gateway {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    feed: Subscriber,
    engine: EngineLink,
    clients: ClientTable,
    config: GatewayConfig,
    /// Per-client receive scratch, reused for every client.
    recv_buf: Vec<u8>,
    /// Envelopes bound for the engine this iteration.
    staging: Vec<u8>,
    reply_buf: Vec<u8>,
    /// Clients whose receive quota ran out; served again next iteration.
    carry: Vec<ClientId>,
    feed_pending: bool,
    stats: GatewayStats,
}

impl Gateway {
    /// Subscribe to the acknowledgement feed, connect to the engine and
    /// start listening for clients. Any failure here is fatal.
    pub fn start(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;

        let poll = Poll::new().map_err(GatewayError::startup("create poll"))?;

        let mut feed =
            Subscriber::bind(config.feed_addr).map_err(GatewayError::startup("subscribe feed"))?;
        poll.registry()
            .register(&mut feed, FEED, Interest::READABLE)
            .map_err(GatewayError::startup("register feed"))?;

        info!(addr = %config.engine_addr, "awaiting engine");
        let mut engine = EngineLink::connect(
            config.engine_addr,
            config.connect_backoff,
            config.connect_attempts,
        )
        .map_err(GatewayError::startup("connect engine"))?;
        poll.registry()
            .register(&mut engine, ENGINE, Interest::READABLE | Interest::WRITABLE)
            .map_err(GatewayError::startup("register engine link"))?;

        let mut listener = TcpListener::bind(config.listen_addr)
            .map_err(GatewayError::startup("bind listener"))?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(GatewayError::startup("register listener"))?;

        info!(
            listen = ?listener.local_addr().ok(),
            feed = ?feed.local_addr().ok(),
            "gateway ready"
        );

        Ok(Self {
            poll,
            events: Events::with_capacity(config.max_events),
            listener,
            feed,
            engine,
            clients: ClientTable::new(config.client_backlog_bytes),
            recv_buf: vec![0; config.client_recv_bytes()],
            staging: Vec::with_capacity(config.engine_send_bytes()),
            reply_buf: vec![0; REPLY_DATAGRAM_BYTES],
            carry: Vec::new(),
            feed_pending: false,
            stats: GatewayStats::default(),
            config,
        })
    }

    /// Client listener address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address the acknowledgement feed is bound to.
    pub fn feed_addr(&self) -> io::Result<SocketAddr> {
        self.feed.local_addr()
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    /// Run until a fatal error.
    pub fn run(&mut self) -> Result<(), GatewayError> {
        let timeout = self.config.poll_timeout;
        loop {
            self.turn(Some(timeout))?;
        }
    }

    /// One loop iteration: wait for readiness, accept, forward client
    /// orders, then deliver acknowledgements.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<(), GatewayError> {
        // Carried work is already known to be ready.
        let timeout = if self.carry.is_empty() && !self.feed_pending {
            timeout
        } else {
            Some(Duration::ZERO)
        };

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(GatewayError::Poll(e)),
        }

        let mut readable = std::mem::take(&mut self.carry);
        let mut writable = Vec::new();
        let mut feed_ready = std::mem::take(&mut self.feed_pending);
        let mut engine_readable = false;
        let mut engine_writable = false;

        for event in self.events.iter() {
            match event.token() {
                // Accepts are drained every iteration below.
                LISTENER => {}
                FEED => feed_ready = true,
                ENGINE => {
                    engine_readable |= event.is_readable() || event.is_read_closed();
                    engine_writable |= event.is_writable();
                }
                token => {
                    let Some(id) = client_of(token) else { continue };
                    if (event.is_readable() || event.is_read_closed() || event.is_error())
                        && !readable.contains(&id)
                    {
                        readable.push(id);
                    }
                    if event.is_writable() {
                        writable.push(id);
                    }
                }
            }
        }

        self.accept_clients();

        if engine_readable && self.engine.closed().map_err(GatewayError::EngineLink)? {
            return Err(GatewayError::EngineClosed);
        }
        if engine_writable {
            self.engine.flush().map_err(GatewayError::EngineLink)?;
        }

        for id in readable {
            self.service_client(id);
        }
        for id in writable {
            self.flush_client(id);
        }

        if !self.staging.is_empty() {
            self.engine
                .send(&self.staging)
                .map_err(GatewayError::EngineLink)?;
            self.staging.clear();
        }

        if feed_ready {
            self.drain_feed()?;
        }

        Ok(())
    }

    fn accept_clients(&mut self) {
        let accepted = self
            .clients
            .accept_pending(&self.listener, self.poll.registry());
        if !accepted.is_empty() {
            self.stats.accepted += accepted.len() as u64;
            debug!(accepted = accepted.len(), clients = self.clients.len(), "accepted clients");
        }
    }

    fn drop_client(&mut self, id: ClientId) {
        if self.clients.remove(id, self.poll.registry()) {
            self.stats.disconnected += 1;
            debug!(client = id, clients = self.clients.len(), "client dropped");
        }
    }

    /// Receive, parse and stage one client's orders.
    fn service_client(&mut self, id: ClientId) {
        // Removed earlier in this iteration.
        let Ok(client) = self.clients.lookup(id) else { return };

        let (len, state) = match client.receive(&mut self.recv_buf) {
            Ok(r) => r,
            Err(e) => {
                warn!(client = id, error = %e, "receive failed");
                self.drop_client(id);
                return;
            }
        };

        if state == RecvState::Closed {
            self.drop_client(id);
            return;
        }

        let data = &self.recv_buf[..len];
        let mut frames = FrameParser::frames(data, FrameMode::Raw);
        let mut violation = None;

        for frame in frames.by_ref() {
            match frame {
                Ok(frame) if frame.msg_type == MessageType::EnterOrder => {
                    self.staging.extend_from_slice(&envelope::encode_header(id));
                    self.staging.extend_from_slice(frame.bytes(data));
                    self.stats.orders_forwarded += 1;
                }
                Ok(frame) => {
                    warn!(
                        client = id,
                        msg_type = ?frame.msg_type,
                        "discarding outbound-only message from client"
                    );
                }
                Err(e) => {
                    violation = Some(e);
                }
            }
        }

        if let Some(e) = violation {
            warn!(client = id, error = %e, "protocol violation, dropping client");
            self.stats.protocol_violations += 1;
            self.drop_client(id);
            return;
        }

        client.keep_partial(frames.remainder());

        if state == RecvState::QuotaExhausted {
            self.carry.push(id);
        }
    }

    fn flush_client(&mut self, id: ClientId) {
        let Ok(client) = self.clients.lookup(id) else { return };
        if let Err(e) = client.flush() {
            warn!(client = id, error = %e, "send failed");
            self.drop_client(id);
        }
    }

    /// Receive acknowledgement datagrams and route each envelope.
    fn drain_feed(&mut self) -> Result<(), GatewayError> {
        for _ in 0..self.config.max_reply_datagrams {
            let len = match self.feed.recv(&mut self.reply_buf) {
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(GatewayError::Feed(e)),
            };
            self.route_replies(len)?;
        }

        // Quota used up; more datagrams may be queued.
        self.feed_pending = true;
        Ok(())
    }

    fn route_replies(&mut self, len: usize) -> Result<(), GatewayError> {
        let data = &self.reply_buf[..len];
        let mut frames = FrameParser::frames(data, FrameMode::Enveloped);

        for frame in frames.by_ref() {
            let frame = frame?;
            let id = frame.routing_id(data)?;
            let message = frame.message(data);

            let client = match self.clients.lookup(id) {
                Ok(client) => client,
                Err(_) => {
                    // Client left while its reply was in flight.
                    warn!(client = id, "dropping reply for unknown client");
                    self.stats.stray_replies += 1;
                    continue;
                }
            };

            match client.send(message) {
                Ok(()) => {
                    self.stats.replies_delivered += 1;
                    debug!(client = id, bytes = message.len(), "replied");
                }
                Err(e) => {
                    warn!(client = id, error = %e, "reply failed, dropping client");
                    if self.clients.remove(id, self.poll.registry()) {
                        self.stats.disconnected += 1;
                    }
                }
            }
        }

        let rest = frames.remainder().len();
        if rest != 0 {
            error!(bytes = rest, "truncated acknowledgement datagram");
            return Err(GatewayError::Protocol(ParseError::Truncated));
        }

        Ok(())
    }
}
