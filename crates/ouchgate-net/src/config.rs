//! Gateway configuration.
//!
//! Buffer sizes are products of a few limits and are checked once at
//! startup by [`GatewayConfig::validate`].

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use ouchgate_proto::envelope::MAX_ENVELOPE_SIZE;
use ouchgate_proto::{links, MAX_MESSAGE_SIZE};

use crate::error::GatewayError;

/// Messages read from one client per loop iteration.
pub const MAX_MESSAGES_PER_CLIENT: usize = 8;

/// Acknowledgement datagrams handled per loop iteration.
pub const MAX_REPLY_DATAGRAMS_PER_LOOP: usize = 64;

/// Readiness events handled per wait.
pub const MAX_EVENTS: usize = 256;

/// Largest acknowledgement datagram accepted from the engine.
pub const REPLY_DATAGRAM_BYTES: usize = 64 * MAX_ENVELOPE_SIZE;

/// Replies queued for a slow client before it is dropped.
pub const CLIENT_BACKLOG_BYTES: usize = 64 * 1024;

/// Readiness wait timeout; bounds how long queued accepts can starve.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// Delay between engine connection attempts.
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Client listener address.
    pub listen_addr: SocketAddr,
    /// Engine TCP address.
    pub engine_addr: SocketAddr,
    /// Acknowledgement group (or unicast address) to subscribe to.
    pub feed_addr: SocketAddrV4,
    pub max_messages_per_client: usize,
    pub max_reply_datagrams: usize,
    pub max_events: usize,
    pub client_backlog_bytes: usize,
    pub poll_timeout: Duration,
    pub connect_backoff: Duration,
    /// Connection attempts before giving up; `None` retries forever.
    pub connect_attempts: Option<u32>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::V4(links::gateway_addr()),
            engine_addr: SocketAddr::V4(links::engine_addr()),
            feed_addr: links::multicast_addr(),
            max_messages_per_client: MAX_MESSAGES_PER_CLIENT,
            max_reply_datagrams: MAX_REPLY_DATAGRAMS_PER_LOOP,
            max_events: MAX_EVENTS,
            client_backlog_bytes: CLIENT_BACKLOG_BYTES,
            poll_timeout: POLL_TIMEOUT,
            connect_backoff: CONNECT_BACKOFF,
            connect_attempts: None,
        }
    }
}

impl GatewayConfig {
    /// Receive quota for one client per iteration.
    pub fn client_recv_bytes(&self) -> usize {
        self.max_messages_per_client * MAX_MESSAGE_SIZE
    }

    /// Staging capacity toward the engine for one full iteration.
    pub fn engine_send_bytes(&self) -> usize {
        self.max_events * self.max_messages_per_client * MAX_ENVELOPE_SIZE
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.max_messages_per_client == 0 {
            return Err(GatewayError::Config("max_messages_per_client must be non-zero".into()));
        }
        if self.max_reply_datagrams == 0 {
            return Err(GatewayError::Config("max_reply_datagrams must be non-zero".into()));
        }
        if self.max_events == 0 {
            return Err(GatewayError::Config("max_events must be non-zero".into()));
        }
        if self.client_backlog_bytes < MAX_MESSAGE_SIZE {
            return Err(GatewayError::Config(format!(
                "client_backlog_bytes must hold at least one message ({MAX_MESSAGE_SIZE} bytes)"
            )));
        }
        if self
            .max_events
            .checked_mul(self.max_messages_per_client)
            .and_then(|n| n.checked_mul(MAX_ENVELOPE_SIZE))
            .is_none()
        {
            return Err(GatewayError::Config("buffer sizing overflows".into()));
        }

        let ports = [
            self.listen_addr.port(),
            self.engine_addr.port(),
            self.feed_addr.port(),
        ];
        for (i, a) in ports.iter().enumerate() {
            for b in &ports[i + 1..] {
                if *a != 0 && a == b {
                    return Err(GatewayError::Config(format!("port {a} used by two links")));
                }
            }
        }

        Ok(())
    }
}
