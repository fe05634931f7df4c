//! Entry order → acceptance reflector.
//!
//! Accumulates the gateway's envelope stream, and for every complete
//! entry order publishes an accepted envelope carrying the same routing
//! id. Timestamp and order id are left at zero: nothing is allocated.

use tracing::{debug, warn};

use ouchgate_feed::Publish;
use ouchgate_proto::envelope::{self, MAX_ENVELOPE_SIZE};
use ouchgate_proto::{EnterOrder, FrameMode, FrameParser, MessageType, ParseError};

use crate::error::EngineError;

/// Default input buffer: 64 envelopes.
pub const GATEWAY_RECV_BYTES: usize = 64 * MAX_ENVELOPE_SIZE;

pub struct Reflector<P> {
    publisher: P,
    input: Vec<u8>,
    received: usize,
    output: [u8; MAX_ENVELOPE_SIZE],
    reflected: u64,
    skipped: u64,
}

impl<P: Publish> Reflector<P> {
    pub fn new(publisher: P) -> Self {
        Self::with_capacity(publisher, GATEWAY_RECV_BYTES)
    }

    /// Input buffer of `capacity` bytes, never less than one envelope.
    pub fn with_capacity(publisher: P, capacity: usize) -> Self {
        Self {
            publisher,
            input: vec![0; capacity.max(MAX_ENVELOPE_SIZE)],
            received: 0,
            output: [0; MAX_ENVELOPE_SIZE],
            reflected: 0,
            skipped: 0,
        }
    }

    /// Free space after the buffered partial envelope. Never empty.
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.input[self.received..]
    }

    /// Account for `n` bytes just received into [`Self::spare`] and
    /// reflect every complete envelope. Returns the number reflected.
    pub fn commit(&mut self, n: usize) -> Result<usize, EngineError> {
        self.received += n;
        debug_assert!(self.received <= self.input.len());

        let data = &self.input[..self.received];
        let mut frames = FrameParser::frames(data, FrameMode::Enveloped);
        let mut count = 0;

        for frame in frames.by_ref() {
            let frame = frame?;
            let id = frame.routing_id(data)?;

            if frame.msg_type != MessageType::EnterOrder {
                warn!(client = id, msg_type = ?frame.msg_type, "skipping non-order envelope");
                self.skipped += 1;
                continue;
            }

            let order: &EnterOrder =
                bytemuck::try_from_bytes(frame.message(data)).map_err(|_| ParseError::Truncated)?;
            let ack = order.accept();
            let len = envelope::wrap(id, bytemuck::bytes_of(&ack), &mut self.output)?;

            self.publisher
                .publish(&self.output[..len])
                .map_err(EngineError::Publish)?;

            debug!(client = id, token = %order.order_token, "order accepted");
            count += 1;
        }

        let consumed = frames.consumed();
        self.input.copy_within(consumed..self.received, 0);
        self.received -= consumed;
        self.reflected += count as u64;

        Ok(count)
    }

    /// Feed bytes from any source.
    pub fn on_bytes(&mut self, mut data: &[u8]) -> Result<usize, EngineError> {
        let mut count = 0;
        while !data.is_empty() {
            let spare = self.spare();
            let n = spare.len().min(data.len());
            spare[..n].copy_from_slice(&data[..n]);
            data = &data[n..];
            count += self.commit(n)?;
        }
        Ok(count)
    }

    /// Bytes of an incomplete envelope waiting for more input.
    pub fn buffered(&self) -> usize {
        self.received
    }

    pub fn reflected(&self) -> u64 {
        self.reflected
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}
