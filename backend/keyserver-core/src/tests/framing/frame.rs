// Unit tests for MessageFrame: the byte codec and the async fill/emit pair

use crate::error::framing::FramingError;
use crate::error::server::KeyServerError;
use crate::framing::message_code::ERROR;
use crate::framing::messages::ErrorResponse;
use crate::framing::{FRAME_HEADER_LEN, FrameDirection, MAX_PAYLOAD_LEN, MessageFrame};
use crate::transport::{ChannelEndpoint, StopToken};

use common::ErrorLocation;

use std::panic::Location;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

fn encoded(code: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = MessageFrame::outbound();
    frame.set_payload(code, payload).expect("payload within limit");
    let mut wire = Vec::new();
    frame.encode_into(&mut wire).expect("encode");
    wire
}

/// **VALUE**: Verifies the byte codec round-trips code and payload exactly.
///
/// **WHY THIS MATTERS**: Every request and response crosses this codec. An
/// off-by-one in the header or a length that only fits 16 bits would corrupt
/// larger key lists silently.
///
/// **BUG THIS CATCHES**: Would catch header fields in the wrong order or
/// endianness, and payload lengths truncated above 64 KiB.
#[test]
fn given_empty_small_and_large_payloads_when_encoded_and_decoded_then_identical() {
    // GIVEN: Payloads of 0 bytes, 1 byte and more than 64 KiB
    let large: Vec<u8> = (0..70_000u32).map(|i| (i % 251) as u8).collect();
    let cases: [(u32, &[u8]); 3] = [(7, &[]), (42, &[0xAB]), (19, large.as_slice())];

    for (code, payload) in cases {
        // WHEN: Encoding then decoding
        let wire = encoded(code, payload);
        let (decoded, consumed) = MessageFrame::decode(&wire).expect("decode");

        // THEN: The same code and payload come back and all bytes were consumed
        assert_eq!(decoded.code(), code);
        assert_eq!(decoded.payload(), payload);
        assert_eq!(decoded.direction(), FrameDirection::Inbound);
        assert_eq!(consumed, FRAME_HEADER_LEN + payload.len());
        assert_eq!(consumed, wire.len());
    }
}

#[test]
fn given_header_layout_when_encoded_then_code_and_length_are_little_endian() {
    // GIVEN/WHEN: A frame with code 0x0102_0304 and a 2-byte payload
    let wire = encoded(0x0102_0304, b"hi");

    // THEN: Both header words are little endian
    assert_eq!(&wire[..4], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&wire[4..8], &[2, 0, 0, 0]);
    assert_eq!(&wire[8..], b"hi");
}

#[test]
fn given_back_to_back_frames_when_decoded_then_consumed_length_splits_them() {
    // GIVEN: Two frames in one buffer
    let mut wire = encoded(1, b"first");
    wire.extend_from_slice(&encoded(2, b"second"));

    // WHEN: Decoding the first, then the remainder
    let (first, consumed) = MessageFrame::decode(&wire).expect("first frame");
    let (second, _) = MessageFrame::decode(&wire[consumed..]).expect("second frame");

    // THEN: Each frame is intact
    assert_eq!(first.payload(), b"first");
    assert_eq!(second.payload(), b"second");
}

/// **VALUE**: Verifies that truncated input is a framing error, not a
/// short frame.
///
/// **BUG THIS CATCHES**: Would catch a decoder that returns whatever payload
/// bytes happen to be available.
#[test]
fn given_truncated_header_or_payload_when_decoded_then_truncated_error() {
    // GIVEN: A valid frame
    let wire = encoded(5, b"payload");

    // WHEN: Decoding a partial header and a partial payload
    let short_header = MessageFrame::decode(&wire[..3]);
    let short_payload = MessageFrame::decode(&wire[..wire.len() - 1]);

    // THEN: Both are rejected as truncated
    assert!(matches!(short_header, Err(FramingError::Truncated { .. })));
    assert!(matches!(short_payload, Err(FramingError::Truncated { .. })));
}

#[test]
fn given_oversized_announced_length_when_decoded_then_payload_too_large() {
    // GIVEN: A header announcing one byte more than the limit
    let mut wire = Vec::new();
    wire.extend_from_slice(&3u32.to_le_bytes());
    wire.extend_from_slice(&((MAX_PAYLOAD_LEN as u32) + 1).to_le_bytes());

    // WHEN: Decoding it
    let result = MessageFrame::decode(&wire);

    // THEN: The length is refused before any payload is read
    assert!(matches!(result, Err(FramingError::PayloadTooLarge { .. })));
}

#[test]
fn given_frame_with_payload_when_cleared_then_empty() {
    // GIVEN: A frame carrying data
    let mut frame = MessageFrame::outbound();
    frame.set_payload(9, b"key material").expect("set payload");

    // WHEN: Clearing it
    frame.clear();

    // THEN: Code and payload are reset
    assert_eq!(frame.code(), 0);
    assert!(frame.payload().is_empty());
}

#[test]
fn given_handler_error_when_error_response_built_then_reserved_code_and_description() {
    // GIVEN: A handler failure
    let failure = KeyServerError::InvalidRequest {
        message: String::from("bad key id"),
        location: ErrorLocation::from(Location::caller()),
    };

    // WHEN: Building the error response
    let frame = MessageFrame::error_response(&failure);

    // THEN: The frame uses the ERROR code and describes the failure
    assert_eq!(frame.code(), ERROR);
    let response: ErrorResponse = frame.decode_payload().expect("decode error response");
    assert_eq!(response.kind, "invalid_request");
    assert!(response.message.contains("bad key id"));
}

#[tokio::test]
async fn given_connected_pair_when_frame_emitted_then_peer_fills_same_frame() {
    // GIVEN: Two connected endpoints
    let (left, right) = UnixStream::pair().expect("socket pair");
    let mut sender = ChannelEndpoint::new(left);
    let mut receiver = ChannelEndpoint::new(right);
    let stop = StopToken::new();

    // WHEN: Emitting a frame on one side and filling on the other
    let mut outbound = MessageFrame::outbound();
    outbound.set_payload(21, &[7u8; 100_000]).expect("set payload");
    let mut inbound = MessageFrame::inbound();

    let (sent, filled) = tokio::join!(
        outbound.emit(&mut sender, &stop),
        inbound.try_fill(&mut receiver, &stop)
    );

    // THEN: The peer receives the whole frame
    sent.expect("emit");
    assert!(filled.expect("fill"));
    assert_eq!(inbound.code(), 21);
    assert_eq!(inbound.payload(), &[7u8; 100_000][..]);
}

/// **VALUE**: Verifies the clean end-of-stream contract of `try_fill`.
///
/// **WHY THIS MATTERS**: Probes (like `is_listening`) connect and hang up
/// without sending anything. That must not be logged as a protocol error.
///
/// **BUG THIS CATCHES**: Would catch `try_fill` treating an immediate close as
/// truncation, or treating a close mid-header as a clean close.
#[tokio::test]
async fn given_peer_closes_before_or_during_frame_when_filling_then_false_or_truncated() {
    let stop = StopToken::new();

    // GIVEN: A peer that closes without sending
    let (left, right) = UnixStream::pair().expect("socket pair");
    drop(left);
    let mut endpoint = ChannelEndpoint::new(right);

    // WHEN: Filling
    let clean = MessageFrame::inbound().try_fill(&mut endpoint, &stop).await;

    // THEN: A clean close is reported as no frame
    assert!(!clean.expect("clean close is not an error"));

    // GIVEN: A peer that sends half a header then closes
    let (mut left, right) = UnixStream::pair().expect("socket pair");
    left.write_all(&[1, 2, 3]).await.expect("write partial header");
    drop(left);
    let mut endpoint = ChannelEndpoint::new(right);

    // WHEN: Filling
    let partial = MessageFrame::inbound().try_fill(&mut endpoint, &stop).await;

    // THEN: The partial frame is a truncation error
    assert!(matches!(partial, Err(FramingError::Truncated { .. })));
}

#[tokio::test]
async fn given_stop_requested_when_filling_then_cancelled() {
    // GIVEN: An idle connection and a stop that was already requested
    let (_left, right) = UnixStream::pair().expect("socket pair");
    let mut endpoint = ChannelEndpoint::new(right);
    let stop = StopToken::new();
    stop.request();

    // WHEN: Filling
    let result = MessageFrame::inbound().try_fill(&mut endpoint, &stop).await;

    // THEN: The read is cancelled instead of waiting forever
    let error = result.expect_err("fill should be cancelled");
    assert!(error.is_cancelled(), "Unexpected error: {error}");
}
