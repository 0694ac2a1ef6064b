//! Fixed 16-byte frame header
//!
//! ```text
//! 0        4            8        12           16
//! +--------+------------+--------+------------+
//! | magic  | payload len|  type  | !type      |
//! +--------+------------+--------+------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Frame marker at offset 0
pub const MAGIC: u32 = 0x55AA_55AA;

/// Size of every frame header
pub const HEADER_SIZE: usize = 16;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: u32,
    pub payload_len: u32,
}

impl Header {
    pub fn new(msg_type: u32, payload_len: u32) -> Self {
        Self { msg_type, payload_len }
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len as usize
    }
}

/// Produce the header for an outbound frame
pub fn encode_header(msg_type: u32, payload_len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    put_header(&mut buf, msg_type, payload_len);
    buf.freeze()
}

pub(crate) fn put_header(buf: &mut BytesMut, msg_type: u32, payload_len: usize) {
    buf.put_u32_le(MAGIC);
    buf.put_u32_le(payload_len as u32);
    buf.put_u32_le(msg_type);
    buf.put_u32_le(!msg_type);
}

/// Parse a header, validating magic and type check
pub fn decode_header(mut data: &[u8]) -> Result<Header, ProtocolError> {
    if data.len() < HEADER_SIZE {
        return Err(ProtocolError::MalformedHeader(data.len(), HEADER_SIZE));
    }

    let magic = data.get_u32_le();
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let payload_len = data.get_u32_le();
    let msg_type = data.get_u32_le();
    let type_check = data.get_u32_le();
    if type_check != !msg_type {
        return Err(ProtocolError::TypeCheckMismatch(msg_type));
    }

    Ok(Header { msg_type, payload_len })
}
