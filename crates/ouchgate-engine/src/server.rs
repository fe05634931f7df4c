//! Engine side of the gateway link.
//!
//! The engine listens for exactly one gateway connection (a blocking
//! startup handshake), then serves that stream non-blocking until the
//! gateway goes away.

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener};
use tracing::info;

use ouchgate_feed::Publish;

use crate::error::EngineError;
use crate::reflector::Reflector;

const GATEWAY: Token = Token(0);

pub struct EngineServer {
    listener: TcpListener,
}

impl EngineServer {
    pub fn bind(addr: SocketAddr) -> Result<Self, EngineError> {
        let listener = TcpListener::bind(addr).map_err(|source| EngineError::Startup {
            context: "bind gateway listener",
            source,
        })?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Block until the gateway connects. The listener is closed afterwards.
    pub fn accept_gateway(self) -> Result<GatewayConnection, EngineError> {
        let startup = |context| move |source| EngineError::Startup { context, source };

        let (stream, peer) = self.listener.accept().map_err(startup("accept gateway"))?;
        stream.set_nodelay(true).map_err(startup("set_nodelay"))?;
        stream.set_nonblocking(true).map_err(startup("set_nonblocking"))?;
        info!(%peer, "gateway connected");

        Ok(GatewayConnection {
            stream: TcpStream::from_std(stream),
            peer,
        })
    }
}

/// The single long-lived stream from the gateway.
pub struct GatewayConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl GatewayConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Reflect everything the gateway sends. Returns `Ok` when the
    /// gateway closes the connection.
    pub fn run<P: Publish>(mut self, reflector: &mut Reflector<P>) -> Result<(), EngineError> {
        let mut poll = Poll::new().map_err(EngineError::Gateway)?;
        poll.registry()
            .register(&mut self.stream, GATEWAY, Interest::READABLE)
            .map_err(EngineError::Gateway)?;
        let mut events = Events::with_capacity(4);

        loop {
            match poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EngineError::Gateway(e)),
            }

            // Only one source is registered: drain it until it would block.
            loop {
                match self.stream.read(reflector.spare()) {
                    Ok(0) => {
                        info!(
                            peer = %self.peer,
                            reflected = reflector.reflected(),
                            "gateway disconnected"
                        );
                        return Ok(());
                    }
                    Ok(n) => {
                        reflector.commit(n)?;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(EngineError::Gateway(e)),
                }
            }
        }
    }
}
