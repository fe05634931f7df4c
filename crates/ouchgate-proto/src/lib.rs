//! Zero-copy OUCH wire protocol and envelope framing.
//!
//! All messages are fixed-size packed structs that can be viewed
//! directly over wire bytes. The first byte of a public message
//! determines its type and therefore its length.

#![no_std]

pub mod envelope;
pub mod links;
pub mod messages;
pub mod parser;

pub use envelope::{RoutingId, ENVELOPE_HEADER_SIZE};
pub use messages::*;
pub use parser::*;
