//! Gateway → engine stream.
//!
//! Connected once at startup (blocking, retrying while the engine is not
//! yet listening), then switched to non-blocking for the event loop.
//! Bytes the socket does not accept are kept and retried on the next
//! writable event, so a short write never loses or reorders data.
//!
//! The pending buffer is unbounded. There is no flow control towards the
//! engine beyond the socket buffers, so a stalled engine grows it.

use mio::event::Source;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream as StdStream};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub struct EngineLink {
    stream: TcpStream,
    pending: Vec<u8>,
    pending_pos: usize,
    bytes_sent: u64,
}

impl EngineLink {
    /// Connect to the engine, retrying on connection refused.
    ///
    /// `attempts` bounds the number of tries; `None` retries forever.
    pub fn connect(addr: SocketAddr, backoff: Duration, attempts: Option<u32>) -> io::Result<Self> {
        let mut tries = 0u32;
        let stream = loop {
            match StdStream::connect(addr) {
                Ok(stream) => break stream,
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    tries += 1;
                    if attempts.is_some_and(|max| tries >= max) {
                        return Err(e);
                    }
                    warn!(%addr, attempt = tries, "engine not ready, retrying");
                    thread::sleep(backoff);
                }
                Err(e) => return Err(e),
            }
        };

        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        info!(%addr, "connected to engine");

        Ok(Self::from_std(stream))
    }

    /// Wrap an already connected stream; it must be non-blocking.
    pub fn from_std(stream: StdStream) -> Self {
        Self {
            stream: TcpStream::from_std(stream),
            pending: Vec::new(),
            pending_pos: 0,
            bytes_sent: 0,
        }
    }

    /// Queue `data` behind anything still pending and write as much as
    /// the socket takes.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        if self.pending_pos > 0 {
            self.pending.drain(..self.pending_pos);
            self.pending_pos = 0;
        }
        self.pending.extend_from_slice(data);
        self.flush()
    }

    /// Write pending bytes until done or the socket would block.
    pub fn flush(&mut self) -> io::Result<()> {
        while self.pending_pos < self.pending.len() {
            match self.stream.write(&self.pending[self.pending_pos..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.pending_pos += n;
                    self.bytes_sent += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.pending.clear();
        self.pending_pos = 0;
        Ok(())
    }

    /// Bytes waiting for the socket.
    pub fn pending(&self) -> usize {
        self.pending.len() - self.pending_pos
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Check a readable link. The engine never writes on this stream, so
    /// readability means it closed. Returns true once the engine is gone.
    pub fn closed(&mut self) -> io::Result<bool> {
        let mut scratch = [0u8; 64];
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => return Ok(true),
                Ok(n) => warn!(bytes = n, "discarding unexpected bytes from engine"),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Source for EngineLink {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
