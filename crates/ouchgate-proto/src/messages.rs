//! OUCH message definitions.
//!
//! All messages use fixed-size packed layouts for zero-copy parsing.
//! Multi-byte integers are big-endian (network byte order) on every
//! link; the structs hold the encoded form and accessors decode it.

use bytemuck::{Pod, Zeroable};
use core::fmt;
use core::mem::size_of;

use crate::parser::ParseError;

/// Width of the order token field.
pub const TOKEN_LENGTH: usize = 14;

/// Side byte values.
pub mod side {
    pub const BUY: u8 = b'B';
    pub const SELL: u8 = b'S';
    pub const SHORT_SELL: u8 = b'T';
}

/// Message type discriminator (first byte of every public message).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Inbound (client → engine)
    EnterOrder = b'O',

    // Outbound (engine → client)
    OrderAccepted = b'A',
}

impl TryFrom<u8> for MessageType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            b'O' => Ok(MessageType::EnterOrder),
            b'A' => Ok(MessageType::OrderAccepted),
            other => Err(ParseError::UnknownMessageType(other)),
        }
    }
}

impl MessageType {
    /// Resolve the type from the first byte of a message.
    #[inline(always)]
    pub fn of(first_byte: u8) -> Result<Self, ParseError> {
        Self::try_from(first_byte)
    }

    /// Exact wire length of a message of this type.
    #[inline(always)]
    pub const fn wire_size(self) -> usize {
        match self {
            MessageType::EnterOrder => size_of::<EnterOrder>(),
            MessageType::OrderAccepted => size_of::<OrderAccepted>(),
        }
    }
}

/// Largest public message.
pub const MAX_MESSAGE_SIZE: usize = max(size_of::<EnterOrder>(), size_of::<OrderAccepted>());

const fn max(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}

/// Client-assigned order token. Fixed width, never null-terminated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct OrderToken(pub [u8; TOKEN_LENGTH]);

impl OrderToken {
    /// Build a token from text, padding with spaces. Longer input is truncated.
    pub fn new(text: &str) -> Self {
        let mut raw = [b' '; TOKEN_LENGTH];
        let bytes = text.as_bytes();
        let len = bytes.len().min(TOKEN_LENGTH);
        raw[..len].copy_from_slice(&bytes[..len]);
        Self(raw)
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8; TOKEN_LENGTH] {
        &self.0
    }

    /// Token text with trailing padding (spaces or NULs) removed.
    ///
    /// Non UTF-8 tokens render as an empty string.
    pub fn as_str(&self) -> &str {
        let end = self
            .0
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |i| i + 1);
        core::str::from_utf8(&self.0[..end]).unwrap_or("")
    }
}

impl fmt::Display for OrderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for OrderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderToken({:?})", self.as_str())
    }
}

/// Enter Order message (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct EnterOrder {
    pub message_type: u8,           // 1 byte ('O')
    pub order_token: OrderToken,    // 14 bytes
    order_book_id: u32,             // 4 bytes
    pub side: u8,                   // 1 byte
    quantity: u64,                  // 8 bytes
    price: i32,                     // 4 bytes
}

const _: () = assert!(size_of::<EnterOrder>() == 32);

// SAFETY: EnterOrder is packed plain-old-data, every bit pattern is valid
unsafe impl Pod for EnterOrder {}
unsafe impl Zeroable for EnterOrder {}

impl EnterOrder {
    pub fn new(
        order_token: OrderToken,
        order_book_id: u32,
        side: u8,
        quantity: u64,
        price: i32,
    ) -> Self {
        Self {
            message_type: MessageType::EnterOrder as u8,
            order_token,
            order_book_id: order_book_id.to_be(),
            side,
            quantity: quantity.to_be(),
            price: price.to_be(),
        }
    }

    #[inline(always)]
    pub fn order_book_id(&self) -> u32 {
        u32::from_be(self.order_book_id)
    }

    #[inline(always)]
    pub fn quantity(&self) -> u64 {
        u64::from_be(self.quantity)
    }

    #[inline(always)]
    pub fn price(&self) -> i32 {
        i32::from_be(self.price)
    }

    /// Build the acknowledgement for this order.
    ///
    /// Timestamp and order id are left at zero; no id is allocated.
    pub fn accept(&self) -> OrderAccepted {
        OrderAccepted {
            message_type: MessageType::OrderAccepted as u8,
            timestamp: 0,
            order_token: self.order_token,
            order_book_id: self.order_book_id,
            side: self.side,
            order_id: 0,
            quantity: self.quantity,
            price: self.price,
        }
    }
}

impl fmt::Debug for EnterOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.order_token;
        f.debug_struct("EnterOrder")
            .field("order_token", &token)
            .field("order_book_id", &self.order_book_id())
            .field("side", &(self.side as char))
            .field("quantity", &self.quantity())
            .field("price", &self.price())
            .finish()
    }
}

/// Order Accepted message (outbound, 48 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct OrderAccepted {
    pub message_type: u8,           // 1 byte ('A')
    timestamp: u64,                 // 8 bytes
    pub order_token: OrderToken,    // 14 bytes
    order_book_id: u32,             // 4 bytes
    pub side: u8,                   // 1 byte
    order_id: u64,                  // 8 bytes
    quantity: u64,                  // 8 bytes
    price: i32,                     // 4 bytes
}

const _: () = assert!(size_of::<OrderAccepted>() == 48);

unsafe impl Pod for OrderAccepted {}
unsafe impl Zeroable for OrderAccepted {}

impl OrderAccepted {
    #[inline(always)]
    pub fn timestamp(&self) -> u64 {
        u64::from_be(self.timestamp)
    }

    #[inline(always)]
    pub fn order_book_id(&self) -> u32 {
        u32::from_be(self.order_book_id)
    }

    #[inline(always)]
    pub fn order_id(&self) -> u64 {
        u64::from_be(self.order_id)
    }

    #[inline(always)]
    pub fn quantity(&self) -> u64 {
        u64::from_be(self.quantity)
    }

    #[inline(always)]
    pub fn price(&self) -> i32 {
        i32::from_be(self.price)
    }

    /// True when every echoed field equals the order's.
    pub fn matches(&self, order: &EnterOrder) -> bool {
        self.order_token == order.order_token
            && self.order_book_id() == order.order_book_id()
            && self.side == order.side
            && self.quantity() == order.quantity()
            && self.price() == order.price()
    }
}

impl fmt::Debug for OrderAccepted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = self.order_token;
        f.debug_struct("OrderAccepted")
            .field("timestamp", &self.timestamp())
            .field("order_token", &token)
            .field("order_book_id", &self.order_book_id())
            .field("side", &(self.side as char))
            .field("order_id", &self.order_id())
            .field("quantity", &self.quantity())
            .field("price", &self.price())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_sizes() {
        assert_eq!(size_of::<EnterOrder>(), 32);
        assert_eq!(size_of::<OrderAccepted>(), 48);
        assert_eq!(MAX_MESSAGE_SIZE, 48);
        assert_eq!(MessageType::EnterOrder.wire_size(), 32);
        assert_eq!(MessageType::OrderAccepted.wire_size(), 48);
    }

    #[test]
    fn test_type_of() {
        assert_eq!(MessageType::of(b'O'), Ok(MessageType::EnterOrder));
        assert_eq!(MessageType::of(b'A'), Ok(MessageType::OrderAccepted));
        assert_eq!(MessageType::of(b'X'), Err(ParseError::UnknownMessageType(b'X')));
        assert_eq!(MessageType::of(0), Err(ParseError::UnknownMessageType(0)));
    }

    #[test]
    fn test_enter_order_is_big_endian() {
        let msg = EnterOrder::new(OrderToken::new("T1"), 7, side::BUY, 100, 2500);
        let bytes = bytemuck::bytes_of(&msg);

        assert_eq!(bytes[0], b'O');
        assert_eq!(&bytes[1..3], b"T1");
        assert_eq!(&bytes[15..19], &[0, 0, 0, 7]);
        assert_eq!(bytes[19], b'B');
        assert_eq!(&bytes[20..28], &100u64.to_be_bytes());
        assert_eq!(&bytes[28..32], &2500i32.to_be_bytes());
    }

    #[test]
    fn test_accept_copies_fields() {
        let msg = EnterOrder::new(OrderToken::new("LOAD_TEST0001"), 7, side::BUY, 100, -2500);
        let ack = msg.accept();

        let msg_type = ack.message_type;
        assert_eq!(msg_type, b'A');
        assert_eq!(ack.timestamp(), 0);
        assert_eq!(ack.order_id(), 0);
        assert_eq!(ack.order_book_id(), 7);
        assert_eq!(ack.quantity(), 100);
        assert_eq!(ack.price(), -2500);
        assert!(ack.matches(&msg));
    }

    #[test]
    fn test_token_padding() {
        let token = OrderToken::new("LOAD_TEST0001");
        assert_eq!(token.as_bytes(), b"LOAD_TEST0001 ");
        assert_eq!(token.as_str(), "LOAD_TEST0001");

        let long = OrderToken::new("ABCDEFGHIJKLMNOPQ");
        assert_eq!(long.as_bytes(), b"ABCDEFGHIJKLMN");

        // NUL padded tokens from C clients render the same way
        let mut raw = [0u8; TOKEN_LENGTH];
        raw[..4].copy_from_slice(b"LOAD");
        assert_eq!(OrderToken(raw).as_str(), "LOAD");
    }
}
