//! Incremental frame parser.
//!
//! Turns an accumulating byte buffer into complete frames plus an
//! unconsumed remainder. The parser never copies; callers move the
//! remainder to the front of their buffer before the next receive.

use core::ops::Range;

use thiserror::Error;

use crate::envelope::{self, RoutingId, ENVELOPE_HEADER_SIZE};
use crate::messages::MessageType;

/// Parse error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Destination buffer doesn't have enough room.
    #[error("buffer too small")]
    BufferTooSmall,
    /// First byte of a message is not a known discriminator.
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),
    /// Envelope shorter than its header or declared message.
    #[error("truncated envelope")]
    Truncated,
    /// Routing id requested from a frame parsed without envelopes.
    #[error("frame has no routing header")]
    NotEnveloped,
}

/// Framing of the stream being parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameMode {
    /// Bare OUCH messages (client links).
    Raw,
    /// Routing header + OUCH message (engine and multicast links).
    Enveloped,
}

impl FrameMode {
    /// Offset of the discriminator within a frame.
    #[inline(always)]
    pub const fn type_offset(self) -> usize {
        match self {
            FrameMode::Raw => 0,
            FrameMode::Enveloped => ENVELOPE_HEADER_SIZE,
        }
    }

    /// Total frame length for a message type.
    #[inline(always)]
    pub const fn frame_size(self, msg_type: MessageType) -> usize {
        self.type_offset() + msg_type.wire_size()
    }
}

/// One complete frame located in a parse buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub offset: usize,
    pub len: usize,
    pub msg_type: MessageType,
    pub mode: FrameMode,
}

impl Frame {
    #[inline(always)]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Whole frame, envelope included.
    #[inline(always)]
    pub fn bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.range()]
    }

    /// Public message bytes, envelope stripped.
    #[inline(always)]
    pub fn message<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.offset + self.mode.type_offset()..self.offset + self.len]
    }

    /// Routing id of an enveloped frame.
    #[inline]
    pub fn routing_id(&self, buf: &[u8]) -> Result<RoutingId, ParseError> {
        match self.mode {
            FrameMode::Raw => Err(ParseError::NotEnveloped),
            FrameMode::Enveloped => envelope::read_header(self.bytes(buf)),
        }
    }
}

/// Frame parser entry point.
pub struct FrameParser;

impl FrameParser {
    /// Iterate the complete frames at the front of `buf`.
    #[inline]
    pub fn frames(buf: &[u8], mode: FrameMode) -> Frames<'_> {
        Frames {
            buf,
            mode,
            cursor: 0,
            done: false,
        }
    }
}

/// Lazy sequence of frames over a buffer.
///
/// Stops at the first incomplete frame. After an unknown discriminator
/// the error is yielded once and the iterator is exhausted.
pub struct Frames<'a> {
    buf: &'a [u8],
    mode: FrameMode,
    cursor: usize,
    done: bool,
}

impl<'a> Frames<'a> {
    /// Bytes covered by the frames yielded so far.
    #[inline(always)]
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Unconsumed tail of the buffer.
    #[inline(always)]
    pub fn remainder(&self) -> &'a [u8] {
        &self.buf[self.cursor..]
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<Frame, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rest = &self.buf[self.cursor..];
        let first = match rest.get(self.mode.type_offset()) {
            Some(&b) => b,
            None => {
                self.done = true;
                return None;
            }
        };

        let msg_type = match MessageType::of(first) {
            Ok(t) => t,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let len = self.mode.frame_size(msg_type);
        if len > rest.len() {
            self.done = true;
            return None;
        }

        let frame = Frame {
            offset: self.cursor,
            len,
            msg_type,
            mode: self.mode,
        };
        self.cursor += len;
        Some(Ok(frame))
    }
}

impl core::iter::FusedIterator for Frames<'_> {}
