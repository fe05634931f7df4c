//! Acknowledgement subscriber.
//!
//! Non-blocking UDP socket joined to the acknowledgement group,
//! registrable with a mio `Poll`.

use mio::event::Source;
use mio::net::UdpSocket;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use tracing::debug;

use ouchgate_proto::links::MULTICAST_INTERFACE;

use crate::SOCKET_BUFFER_SIZE;

/// Subscribed acknowledgement socket.
pub struct Subscriber {
    socket: UdpSocket,
}

impl Subscriber {
    /// Bind and subscribe.
    ///
    /// A multicast address binds the group port and joins the group on
    /// the loopback interface. A unicast address is bound directly, which
    /// lets a publisher address this subscriber point to point.
    pub fn bind(addr: SocketAddrV4) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
        socket.bind(&SockAddr::from(addr))?;

        if addr.ip().is_multicast() {
            socket.join_multicast_v4(addr.ip(), &MULTICAST_INTERFACE)?;
        }

        let socket = UdpSocket::from_std(socket.into());
        debug!(%addr, local = ?socket.local_addr().ok(), "subscribed");

        Ok(Self { socket })
    }

    /// Locally bound address (the real port when bound to port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive one datagram. `WouldBlock` means none are queued.
    #[inline]
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl Source for Subscriber {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.socket.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.socket.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.socket.deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{Publish, Publisher};
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    fn recv_with_deadline(sub: &Subscriber, buf: &mut [u8]) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match sub.recv(buf) {
                Ok(n) => return n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    assert!(Instant::now() < deadline, "no datagram received");
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("recv failed: {e}"),
            }
        }
    }

    #[test]
    fn test_unicast_subscription() {
        let sub = Subscriber::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(
            sub.recv(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );

        let dest = match sub.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        let mut publisher = Publisher::new(dest).unwrap();
        publisher.publish(b"ack").unwrap();

        let n = recv_with_deadline(&sub, &mut buf);
        assert_eq!(&buf[..n], b"ack");
    }
}
