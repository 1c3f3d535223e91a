use crate::error::framing::FramingError;
use crate::error::server::KeyServerError;
use crate::framing::message_code::ERROR;
use crate::framing::messages::ErrorResponse;
use crate::transport::{ChannelEndpoint, StopToken};

use common::ErrorLocation;

use std::fmt;
use std::mem::take;
use std::panic::Location;

use log::error;
use prost::Message as ProstMessage;
use zeroize::Zeroize;

/// Bytes of `code` + `length` preceding every payload.
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload a peer may announce. Anything larger is a framing error.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Inbound,
    Outbound,
}

/// One message on the channel: a code and an opaque payload.
///
/// Frames are meant to be reused: the control loop keeps one inbound and one
/// outbound frame and refills them for every connection. [`clear`](Self::clear)
/// wipes the previous payload, since it may have carried key bytes.
pub struct MessageFrame {
    direction: FrameDirection,
    code: u32,
    payload: Vec<u8>,
    wire: Vec<u8>,
}

impl MessageFrame {
    pub fn new(direction: FrameDirection) -> Self {
        Self {
            direction,
            code: 0,
            payload: Vec::new(),
            wire: Vec::new(),
        }
    }

    pub fn inbound() -> Self {
        Self::new(FrameDirection::Inbound)
    }

    pub fn outbound() -> Self {
        Self::new(FrameDirection::Outbound)
    }

    /// Outbound frame with `code` and an empty payload.
    pub fn no_content(code: u32) -> Self {
        let mut frame = Self::outbound();
        frame.set_no_content(code);
        frame
    }

    /// Outbound [`ERROR`] frame describing `failure`.
    pub fn error_response(failure: &KeyServerError) -> Self {
        let mut frame = Self::outbound();
        frame.set_error_response(failure);
        frame
    }

    pub fn direction(&self) -> FrameDirection {
        self.direction
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Reset to an empty frame, wiping payload and wire buffers but keeping
    /// their capacity.
    pub fn clear(&mut self) {
        self.code = 0;
        self.payload.zeroize();
        self.wire.zeroize();
    }

    pub fn set_no_content(&mut self, code: u32) {
        self.clear();
        self.code = code;
    }

    /// Replace the frame contents with raw payload bytes.
    pub fn set_payload(&mut self, code: u32, payload: &[u8]) -> Result<(), FramingError> {
        check_payload_len(payload.len())?;
        self.clear();
        self.code = code;
        self.payload.extend_from_slice(payload);
        Ok(())
    }

    /// Replace the frame contents with an encoded protobuf message.
    pub fn set_message<M: ProstMessage>(&mut self, code: u32, message: &M) -> Result<(), FramingError> {
        check_payload_len(message.encoded_len())?;
        self.clear();
        self.code = code;
        message.encode(&mut self.payload)?;
        Ok(())
    }

    /// Replace the frame contents with an [`ERROR`] response for `failure`.
    pub fn set_error_response(&mut self, failure: &KeyServerError) {
        let response = ErrorResponse {
            kind: failure.kind().to_string(),
            message: failure.to_string(),
        };

        if let Err(e) = self.set_message(ERROR, &response) {
            // Only reachable if the description itself exceeds the payload limit.
            error!("Failed to encode error response: {e}");
            self.set_no_content(ERROR);
        }
    }

    pub fn decode_payload<M: ProstMessage + Default>(&self) -> Result<M, FramingError> {
        Ok(M::decode(self.payload.as_slice())?)
    }

    /// Append the wire form of this frame to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), FramingError> {
        let length = check_payload_len(self.payload.len())?;

        out.reserve(FRAME_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Decode one complete frame from the front of `bytes`.
    ///
    /// Returns the inbound frame and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// - [`FramingError::Truncated`] if `bytes` ends before the frame does
    /// - [`FramingError::PayloadTooLarge`] if the announced length exceeds [`MAX_PAYLOAD_LEN`]
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), FramingError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FramingError::Truncated {
                message: format!(
                    "{} bytes available, header needs {FRAME_HEADER_LEN}",
                    bytes.len()
                ),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let (code, length) = parse_header(&bytes[..FRAME_HEADER_LEN])?;
        let end = FRAME_HEADER_LEN + length;

        if bytes.len() < end {
            return Err(FramingError::Truncated {
                message: format!(
                    "{} payload bytes available, header announced {length}",
                    bytes.len() - FRAME_HEADER_LEN
                ),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let mut frame = Self::inbound();
        frame.code = code;
        frame.payload.extend_from_slice(&bytes[FRAME_HEADER_LEN..end]);
        Ok((frame, end))
    }

    /// Read the next frame from `endpoint` into `self`.
    ///
    /// Returns `Ok(false)` if the peer closed the stream before sending any
    /// byte of a new frame. A stream that ends part way through a frame is a
    /// [`FramingError::Truncated`].
    pub async fn try_fill(
        &mut self,
        endpoint: &mut ChannelEndpoint,
        stop: &StopToken,
    ) -> Result<bool, FramingError> {
        self.clear();

        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;

        while filled < FRAME_HEADER_LEN {
            let read = endpoint.receive(&mut header[filled..], stop).await?;
            if read == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(FramingError::Truncated {
                    message: format!(
                        "Stream closed after {filled} of {FRAME_HEADER_LEN} header bytes"
                    ),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            filled += read;
        }

        let (code, length) = parse_header(&header)?;
        self.code = code;
        self.payload.resize(length, 0);

        let mut filled = 0;
        while filled < length {
            let read = endpoint.receive(&mut self.payload[filled..], stop).await?;
            if read == 0 {
                self.clear();
                return Err(FramingError::Truncated {
                    message: format!("Stream closed after {filled} of {length} payload bytes"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            filled += read;
        }

        Ok(true)
    }

    /// Write this frame to `endpoint` with a single buffered write.
    pub async fn emit(
        &mut self,
        endpoint: &mut ChannelEndpoint,
        stop: &StopToken,
    ) -> Result<(), FramingError> {
        let mut wire = take(&mut self.wire);
        wire.zeroize();
        self.encode_into(&mut wire)?;

        let sent = endpoint.send(&wire, stop).await;

        wire.zeroize();
        self.wire = wire;
        Ok(sent?)
    }
}

impl fmt::Debug for MessageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFrame")
            .field("direction", &self.direction)
            .field("code", &self.code)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[track_caller]
fn check_payload_len(length: usize) -> Result<u32, FramingError> {
    if length > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge {
            length,
            limit: MAX_PAYLOAD_LEN,
            location: ErrorLocation::from(Location::caller()),
        });
    }
    // MAX_PAYLOAD_LEN fits in a u32.
    Ok(length as u32)
}

#[track_caller]
fn parse_header(header: &[u8]) -> Result<(u32, usize), FramingError> {
    let code = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    check_payload_len(length)?;
    Ok((code, length))
}
