//! Acknowledgement feed over UDP multicast.
//!
//! The engine publishes enveloped acknowledgements; the gateway
//! subscribes and demultiplexes them back to clients.

pub mod publisher;
pub mod subscriber;

pub use publisher::{Publish, Publisher};
pub use subscriber::Subscriber;

/// Kernel socket buffer requested on both ends of the feed.
pub const SOCKET_BUFFER_SIZE: usize = 8 * 1024 * 1024;
