//! Framing properties over fragmented streams.

use ouchgate_proto::envelope;
use ouchgate_proto::{
    side, EnterOrder, FrameMode, FrameParser, MessageType, OrderToken, ENVELOPE_HEADER_SIZE,
};
use proptest::prelude::*;

/// Feed `chunks` through a receive buffer the way a connection does:
/// append, parse, keep the remainder at the front.
fn reassemble(chunks: &[&[u8]], mode: FrameMode) -> Vec<Vec<u8>> {
    let mut buffer: Vec<u8> = Vec::new();
    let mut out = Vec::new();

    for chunk in chunks {
        buffer.extend_from_slice(chunk);

        let mut frames = FrameParser::frames(&buffer, mode);
        for frame in frames.by_ref() {
            let frame = frame.expect("well-formed stream");
            out.push(frame.bytes(&buffer).to_vec());
        }
        let consumed = frames.consumed();
        buffer.drain(..consumed);
    }

    assert!(buffer.is_empty(), "stream ended mid-frame");
    out
}

fn order(i: u32) -> EnterOrder {
    let token = format!("T{i:05}");
    EnterOrder::new(
        OrderToken::new(&token),
        i,
        side::BUY,
        u64::from(i) * 10,
        (i as i32).wrapping_neg(),
    )
}

fn accepted_or_entry(i: u32) -> Vec<u8> {
    let entry = order(i);
    if i % 3 == 0 {
        bytemuck::bytes_of(&entry.accept()).to_vec()
    } else {
        bytemuck::bytes_of(&entry).to_vec()
    }
}

#[test]
fn split_at_every_boundary_raw() {
    let messages: Vec<Vec<u8>> = (0..5).map(accepted_or_entry).collect();
    let stream: Vec<u8> = messages.concat();

    for cut in 0..=stream.len() {
        let (a, b) = stream.split_at(cut);
        assert_eq!(reassemble(&[a, b], FrameMode::Raw), messages, "cut at {cut}");
    }
}

#[test]
fn split_at_every_pair_of_boundaries_enveloped() {
    let messages: Vec<Vec<u8>> = (0..3)
        .map(|i| {
            let msg = accepted_or_entry(i);
            let mut buf = vec![0u8; ENVELOPE_HEADER_SIZE + msg.len()];
            envelope::wrap(u64::from(i) + 1000, &msg, &mut buf).unwrap();
            buf
        })
        .collect();
    let stream: Vec<u8> = messages.concat();

    for first in 0..=stream.len() {
        for second in first..=stream.len() {
            let chunks = [&stream[..first], &stream[first..second], &stream[second..]];
            assert_eq!(reassemble(&chunks, FrameMode::Enveloped), messages);
        }
    }
}

#[test]
fn byte_at_a_time() {
    let messages: Vec<Vec<u8>> = (0..4).map(accepted_or_entry).collect();
    let stream: Vec<u8> = messages.concat();
    let chunks: Vec<&[u8]> = stream.chunks(1).collect();

    assert_eq!(reassemble(&chunks, FrameMode::Raw), messages);
}

proptest! {
    #[test]
    fn arbitrary_chunking_preserves_frames(
        count in 1u32..16,
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..12),
    ) {
        let messages: Vec<Vec<u8>> = (0..count).map(accepted_or_entry).collect();
        let stream: Vec<u8> = messages.concat();

        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
        points.sort_unstable();
        points.dedup();

        let mut chunks = Vec::new();
        let mut start = 0;
        for p in points {
            chunks.push(&stream[start..p]);
            start = p;
        }
        chunks.push(&stream[start..]);

        prop_assert_eq!(reassemble(&chunks, FrameMode::Raw), messages);
    }

    #[test]
    fn envelope_round_trip(id in any::<u64>(), i in any::<u32>(), accepted in any::<bool>()) {
        let entry = order(i);
        let msg = if accepted {
            bytemuck::bytes_of(&entry.accept()).to_vec()
        } else {
            bytemuck::bytes_of(&entry).to_vec()
        };

        let mut buf = [0u8; envelope::MAX_ENVELOPE_SIZE];
        let len = envelope::wrap(id, &msg, &mut buf).unwrap();
        let (got_id, got_msg) = envelope::unwrap(&buf[..len]).unwrap();

        prop_assert_eq!(got_id, id);
        prop_assert_eq!(got_msg, &msg[..]);

        let expected = if accepted { MessageType::OrderAccepted } else { MessageType::EnterOrder };
        prop_assert_eq!(len, envelope::envelope_size(expected));
    }
}
