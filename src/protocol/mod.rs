//! Wire codec for the adapter protocol
//!
//! Stateless framing: a 16-byte header followed by a type-specific
//! little-endian payload.

pub mod header;
pub mod inbound;
pub mod outbound;
pub mod types;

pub use header::{decode_header, encode_header, Header, HEADER_SIZE, MAGIC};
pub use inbound::{decode_message, AudioData, AudioPayload, DecodedMessage, MediaData, VideoFrame};
pub use outbound::{encode_message, BoxSettings, EncodedFrame, OpenSettings, OutboundMessage, TouchPoint};
pub use types::{AudioCommand, AudioFormat, Command, MessageType, MultiTouchAction, TouchAction};
