//! Fixed link endpoints shared by gateway, engine and load client.

use core::net::{Ipv4Addr, SocketAddrV4};

/// Client ↔ gateway TCP port.
pub const GATEWAY_PORT: u16 = 3000;

/// Gateway → engine TCP port.
pub const ENGINE_PORT: u16 = 3001;

/// Engine → gateway acknowledgement multicast port.
pub const MULTICAST_PORT: u16 = 3002;

/// Acknowledgement multicast group.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 1);

/// Interface used for multicast publish and membership.
pub const MULTICAST_INTERFACE: Ipv4Addr = Ipv4Addr::LOCALHOST;

const _: () = assert!(GATEWAY_PORT != ENGINE_PORT && ENGINE_PORT != MULTICAST_PORT);
const _: () = assert!(GATEWAY_PORT != MULTICAST_PORT);

pub const fn gateway_addr() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, GATEWAY_PORT)
}

pub const fn engine_addr() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, ENGINE_PORT)
}

pub const fn multicast_addr() -> SocketAddrV4 {
    SocketAddrV4::new(MULTICAST_GROUP, MULTICAST_PORT)
}
