//! Message framing for the key server channel.
//!
//! Every message on the wire is a single frame:
//!
//! ```text
//! +----------------+------------------+-----------------+
//! | code: u32 (LE) | length: u32 (LE) | payload (bytes) |
//! +----------------+------------------+-----------------+
//! ```
//!
//! Payloads are protobuf messages (see [`messages`]); the framing layer itself
//! treats them as opaque bytes. A request and its response travel as one frame
//! each over a dedicated connection.

mod frame;
pub mod message_code;
pub mod messages;

pub use frame::{FRAME_HEADER_LEN, FrameDirection, MAX_PAYLOAD_LEN, MessageFrame};
