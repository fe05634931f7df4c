//! Client connection table.
//!
//! Owns every client socket and its partial-frame state. Routing ids
//! are handed out monotonically and never reused, so a reply addressed
//! to a departed client can always be recognised as stale.

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{info, warn};

use ouchgate_proto::{RoutingId, MAX_MESSAGE_SIZE};

use crate::error::GatewayError;

pub type ClientId = RoutingId;

/// Tokens below this are reserved for the gateway's own sockets.
pub const CLIENT_TOKEN_BASE: usize = 3;

#[inline(always)]
pub fn token_of(id: ClientId) -> Token {
    Token(id as usize + CLIENT_TOKEN_BASE)
}

#[inline(always)]
pub fn client_of(token: Token) -> Option<ClientId> {
    token.0.checked_sub(CLIENT_TOKEN_BASE).map(|id| id as ClientId)
}

/// Why a receive pass stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvState {
    /// Socket reported no more data.
    Drained,
    /// Receive quota used up; more data may be pending.
    QuotaExhausted,
    /// Peer closed the connection.
    Closed,
}

/// Per-client state.
pub struct Client {
    stream: TcpStream,
    addr: SocketAddr,
    partial: [u8; MAX_MESSAGE_SIZE],
    partial_len: usize,
    write_buffer: Vec<u8>,
    write_pos: usize,
    backlog_limit: usize,
}

impl Client {
    fn new(stream: TcpStream, addr: SocketAddr, backlog_limit: usize) -> Self {
        Self {
            stream,
            addr,
            partial: [0; MAX_MESSAGE_SIZE],
            partial_len: 0,
            write_buffer: Vec::new(),
            write_pos: 0,
            backlog_limit,
        }
    }

    /// Receive into `buf`, starting after the carried-over partial frame.
    ///
    /// Reads until the socket would block, `buf` is full, or the peer
    /// closes. Returns the number of valid bytes at the front of `buf`.
    pub fn receive(&mut self, buf: &mut [u8]) -> io::Result<(usize, RecvState)> {
        let mut len = self.partial_len;
        buf[..len].copy_from_slice(&self.partial[..len]);

        while len < buf.len() {
            match self.stream.read(&mut buf[len..]) {
                Ok(0) => return Ok((len, RecvState::Closed)),
                Ok(n) => len += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok((len, RecvState::Drained));
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok((len, RecvState::QuotaExhausted))
    }

    /// Keep the unparsed tail for the next receive.
    pub fn keep_partial(&mut self, tail: &[u8]) {
        debug_assert!(tail.len() < MAX_MESSAGE_SIZE, "remainder holds a complete frame");
        self.partial[..tail.len()].copy_from_slice(tail);
        self.partial_len = tail.len();
    }

    /// Send bytes, queueing whatever the socket does not take now.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if self.write_pos < self.write_buffer.len() {
            return self.queue_write(data);
        }

        let mut written = 0;
        while written < data.len() {
            match self.stream.write(&data[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.queue_write(&data[written..])
    }

    /// Queue data for writing on the next writable event.
    fn queue_write(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if self.queued() + data.len() > self.backlog_limit {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "client reply backlog full",
            ));
        }

        if self.write_pos > 0 {
            self.write_buffer.drain(..self.write_pos);
            self.write_pos = 0;
        }
        self.write_buffer.extend_from_slice(data);
        Ok(())
    }

    /// Write queued replies until done or the socket would block.
    pub fn flush(&mut self) -> io::Result<()> {
        while self.write_pos < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[self.write_pos..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.write_pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.write_buffer.clear();
        self.write_pos = 0;
        Ok(())
    }

    /// Bytes waiting for a writable event.
    pub fn queued(&self) -> usize {
        self.write_buffer.len() - self.write_pos
    }
}

/// Mapping from routing id to live client.
pub struct ClientTable {
    clients: HashMap<ClientId, Client>,
    next_id: ClientId,
    backlog_limit: usize,
}

impl ClientTable {
    pub fn new(backlog_limit: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_id: 0,
            backlog_limit,
        }
    }

    /// Accept every pending connection on `listener`.
    ///
    /// A failure on one connection drops only that connection.
    pub fn accept_pending(&mut self, listener: &TcpListener, registry: &Registry) -> Vec<ClientId> {
        let mut accepted = Vec::new();

        loop {
            let (mut stream, addr) = match listener.accept() {
                Ok(conn) => conn,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    warn!(error = %e, "accept failed, skipping connection");
                    continue;
                }
                Err(e) => {
                    // Not tied to one connection (e.g. descriptor limit); retry next iteration.
                    warn!(error = %e, "accept failed");
                    break;
                }
            };

            let id = self.next_id;
            self.next_id += 1;

            if let Err(e) = stream.set_nodelay(true) {
                warn!(client = id, %addr, error = %e, "set_nodelay failed, dropping connection");
                continue;
            }

            if let Err(e) = registry.register(
                &mut stream,
                token_of(id),
                Interest::READABLE | Interest::WRITABLE,
            ) {
                warn!(client = id, %addr, error = %e, "registration failed, dropping connection");
                continue;
            }

            self.clients
                .insert(id, Client::new(stream, addr, self.backlog_limit));
            info!(client = id, %addr, "client connected");
            accepted.push(id);
        }

        accepted
    }

    pub fn lookup(&mut self, id: ClientId) -> Result<&mut Client, GatewayError> {
        self.clients
            .get_mut(&id)
            .ok_or(GatewayError::UnknownClient(id))
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Deregister, close and forget a client. Returns false if it was
    /// already gone.
    pub fn remove(&mut self, id: ClientId, registry: &Registry) -> bool {
        match self.clients.remove(&id) {
            Some(mut client) => {
                let _ = registry.deregister(&mut client.stream);
                info!(client = id, addr = %client.addr, "client disconnected");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Next id that will be assigned.
    pub fn next_id(&self) -> ClientId {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll};
    use socket2::{Domain, Socket, Type};
    use std::net::TcpStream as StdStream;
    use std::time::{Duration, Instant};

    const LISTENER: Token = Token(0);

    fn setup() -> (Poll, TcpListener, SocketAddr) {
        let poll = Poll::new().unwrap();
        let mut listener = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .unwrap();
        let addr = listener.local_addr().unwrap();
        (poll, listener, addr)
    }

    /// Accept until `want` clients have arrived or the deadline passes.
    fn accept_n(
        table: &mut ClientTable,
        poll: &mut Poll,
        listener: &TcpListener,
        want: usize,
    ) -> Vec<ClientId> {
        let mut events = Events::with_capacity(16);
        let mut ids = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while ids.len() < want {
            assert!(Instant::now() < deadline, "connections never arrived");
            poll.poll(&mut events, Some(Duration::from_millis(10))).unwrap();
            ids.extend(table.accept_pending(listener, poll.registry()));
        }
        ids
    }

    #[test]
    fn test_token_mapping() {
        assert_eq!(client_of(token_of(0)), Some(0));
        assert_eq!(client_of(token_of(41)), Some(41));
        assert_eq!(client_of(Token(0)), None);
        assert_eq!(client_of(Token(CLIENT_TOKEN_BASE - 1)), None);
    }

    #[test]
    fn test_accept_assigns_increasing_ids() {
        let (mut poll, listener, addr) = setup();
        let mut table = ClientTable::new(1024);

        let _a = StdStream::connect(addr).unwrap();
        let _b = StdStream::connect(addr).unwrap();
        let _c = StdStream::connect(addr).unwrap();

        let ids = accept_n(&mut table, &mut poll, &listener, 3);
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(table.len(), 3);
        assert!(table.lookup(1).is_ok());
    }

    #[test]
    fn test_listener_error_stops_draining() {
        let poll = Poll::new().unwrap();
        // Bound but never listening, so every accept fails the same way.
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        socket.bind(&addr.into()).unwrap();
        socket.set_nonblocking(true).unwrap();
        let listener = TcpListener::from_std(socket.into());
        let mut table = ClientTable::new(1024);

        assert!(table.accept_pending(&listener, poll.registry()).is_empty());
        assert!(table.accept_pending(&listener, poll.registry()).is_empty());
        assert_eq!(table.next_id(), 0);
    }

    #[test]
    fn test_ids_never_reused_after_reconnect() {
        let (mut poll, listener, addr) = setup();
        let mut table = ClientTable::new(1024);
        let mut seen = Vec::new();

        for _ in 0..4 {
            let stream = StdStream::connect(addr).unwrap();
            let ids = accept_n(&mut table, &mut poll, &listener, 1);
            for id in &ids {
                assert!(!seen.contains(id), "id {id} reused");
                assert!(table.remove(*id, poll.registry()));
            }
            seen.extend(ids);
            drop(stream);
        }

        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(table.is_empty());
        assert_eq!(table.next_id(), 4);
    }

    #[test]
    fn test_lookup_unknown_client() {
        let mut table = ClientTable::new(1024);
        assert!(matches!(table.lookup(7), Err(GatewayError::UnknownClient(7))));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (mut poll, listener, addr) = setup();
        let mut table = ClientTable::new(1024);

        let _s = StdStream::connect(addr).unwrap();
        let ids = accept_n(&mut table, &mut poll, &listener, 1);

        assert!(table.remove(ids[0], poll.registry()));
        assert!(!table.remove(ids[0], poll.registry()));
        assert!(!table.contains(ids[0]));
        assert!(table.lookup(ids[0]).is_err());
    }

    #[test]
    fn test_receive_carries_partial() {
        let (mut poll, listener, addr) = setup();
        let mut table = ClientTable::new(1024);

        let mut peer = StdStream::connect(addr).unwrap();
        let ids = accept_n(&mut table, &mut poll, &listener, 1);
        peer.write_all(b"world").unwrap();

        let client = table.lookup(ids[0]).unwrap();
        client.keep_partial(b"hello ");

        let mut buf = [0u8; 64];
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let (len, state) = client.receive(&mut buf).unwrap();
            if len == 11 {
                assert_eq!(&buf[..len], b"hello world");
                assert_eq!(state, RecvState::Drained);
                break;
            }
            assert!(Instant::now() < deadline, "data never arrived");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_receive_reports_quota_and_close() {
        let (mut poll, listener, addr) = setup();
        let mut table = ClientTable::new(1024);

        let mut peer = StdStream::connect(addr).unwrap();
        let ids = accept_n(&mut table, &mut poll, &listener, 1);
        peer.write_all(&[b'x'; 16]).unwrap();
        drop(peer);

        let client = table.lookup(ids[0]).unwrap();
        let mut buf = [0u8; 8];
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let (len, state) = client.receive(&mut buf).unwrap();
            if state == RecvState::QuotaExhausted {
                assert_eq!(len, 8);
                break;
            }
            assert!(Instant::now() < deadline, "data never arrived");
            std::thread::sleep(Duration::from_millis(1));
        }

        client.keep_partial(&[]);
        let mut big = [0u8; 64];
        loop {
            let (_, state) = client.receive(&mut big).unwrap();
            if state == RecvState::Closed {
                break;
            }
            assert!(Instant::now() < deadline, "close never observed");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_send_reaches_peer() {
        let (mut poll, listener, addr) = setup();
        let mut table = ClientTable::new(1024);

        let mut peer = StdStream::connect(addr).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let ids = accept_n(&mut table, &mut poll, &listener, 1);

        let client = table.lookup(ids[0]).unwrap();
        client.send(b"reply").unwrap();
        client.flush().unwrap();
        assert_eq!(client.queued(), 0);

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"reply");
    }
}
