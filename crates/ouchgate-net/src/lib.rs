//! Order-entry gateway for low-latency TCP/UDP I/O.
//!
//! Uses mio for non-blocking event-driven networking on a single thread.

pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod link;

pub use client::{ClientId, ClientTable};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayStats};
