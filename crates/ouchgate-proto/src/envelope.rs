//! Internal routing envelope.
//!
//! An envelope is an 8-byte routing header followed by exactly one
//! public message. Envelopes only travel between gateway and engine;
//! clients never see them.

use core::mem::size_of;

use crate::messages::{MessageType, MAX_MESSAGE_SIZE};
use crate::parser::ParseError;

/// Gateway-assigned client identifier carried in every envelope.
pub type RoutingId = u64;

/// Size of the routing header.
pub const ENVELOPE_HEADER_SIZE: usize = size_of::<RoutingId>();

/// Largest envelope on the wire.
pub const MAX_ENVELOPE_SIZE: usize = ENVELOPE_HEADER_SIZE + MAX_MESSAGE_SIZE;

/// Total envelope length for a message type.
#[inline(always)]
pub const fn envelope_size(msg_type: MessageType) -> usize {
    ENVELOPE_HEADER_SIZE + msg_type.wire_size()
}

/// Encode a routing header.
#[inline(always)]
pub fn encode_header(id: RoutingId) -> [u8; ENVELOPE_HEADER_SIZE] {
    id.to_be_bytes()
}

/// Read the routing id from the front of an envelope.
#[inline]
pub fn read_header(envelope: &[u8]) -> Result<RoutingId, ParseError> {
    let header: [u8; ENVELOPE_HEADER_SIZE] = envelope
        .get(..ENVELOPE_HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or(ParseError::Truncated)?;
    Ok(RoutingId::from_be_bytes(header))
}

/// Write `message` wrapped in an envelope for `id` into `out`.
///
/// Returns the number of bytes written.
pub fn wrap(id: RoutingId, message: &[u8], out: &mut [u8]) -> Result<usize, ParseError> {
    let len = ENVELOPE_HEADER_SIZE + message.len();
    if out.len() < len {
        return Err(ParseError::BufferTooSmall);
    }

    out[..ENVELOPE_HEADER_SIZE].copy_from_slice(&encode_header(id));
    out[ENVELOPE_HEADER_SIZE..len].copy_from_slice(message);
    Ok(len)
}

/// Split a complete envelope into routing id and message bytes.
///
/// The message must be fully present: a consumer may not look at the
/// payload before the whole envelope has arrived.
pub fn unwrap(envelope: &[u8]) -> Result<(RoutingId, &[u8]), ParseError> {
    let id = read_header(envelope)?;
    let first = *envelope.get(ENVELOPE_HEADER_SIZE).ok_or(ParseError::Truncated)?;
    let msg_type = MessageType::of(first)?;
    let end = envelope_size(msg_type);
    let message = envelope
        .get(ENVELOPE_HEADER_SIZE..end)
        .ok_or(ParseError::Truncated)?;
    Ok((id, message))
}
