//! Acknowledgement publisher implementation.
//!
//! Uses UDP for low-latency dissemination. The socket stays blocking:
//! a datagram send completes in bounded time and must never be dropped.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use tracing::debug;

use ouchgate_proto::links::MULTICAST_INTERFACE;

use crate::SOCKET_BUFFER_SIZE;

/// Sink for outbound acknowledgement datagrams.
pub trait Publish {
    /// Send one datagram. Any error is a transport failure.
    fn publish(&mut self, datagram: &[u8]) -> io::Result<()>;
}

/// Acknowledgement publisher.
pub struct Publisher {
    socket: UdpSocket,
    dest_addr: SocketAddr,
    published: u64,
}

impl Publisher {
    /// Create a new publisher.
    ///
    /// For multicast, use a multicast group address (e.g. `239.1.1.1:3002`);
    /// the loopback interface is selected for outbound traffic.
    /// For unicast, use the destination address directly.
    pub fn new(dest: SocketAddrV4) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        if dest.ip().is_multicast() {
            socket.set_multicast_if_v4(&MULTICAST_INTERFACE)?;
            socket.set_multicast_loop_v4(true)?;
            socket.set_multicast_ttl_v4(1)?;
        }
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;

        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket.bind(&SockAddr::from(local))?;

        debug!(%dest, "publisher ready");

        Ok(Self {
            socket: socket.into(),
            dest_addr: SocketAddr::V4(dest),
            published: 0,
        })
    }

    /// Destination of published datagrams.
    pub fn dest_addr(&self) -> SocketAddr {
        self.dest_addr
    }

    /// Number of datagrams published.
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl Publish for Publisher {
    fn publish(&mut self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(datagram, self.dest_addr)?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram: {sent} of {} bytes", datagram.len()),
            ));
        }

        self.published += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_unicast_publish() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let dest = match receiver.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };

        let mut publisher = Publisher::new(dest).unwrap();
        publisher.publish(b"hello").unwrap();
        publisher.publish(b"world").unwrap();
        assert_eq!(publisher.published(), 2);

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"world");
    }
}
