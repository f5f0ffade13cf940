//! Message framing: `[1-byte code][4-byte big-endian length][payload]`.
//!
//! The length counts itself but not the code byte, so an empty message
//! carries length 4.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

use super::types::U32BE;

/// Size of the code byte plus the length field.
pub const HEADER_LEN: usize = 5;

/// Size of the length field, which is included in the encoded length.
pub const LENGTH_LEN: usize = 4;

/// Largest payload that fits the 32-bit length field.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize - LENGTH_LEN;

/// Wire header of a single protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Message type byte
    pub code: u8,
    /// Length including the 4 length bytes
    pub length: U32BE,
}

impl FrameHeader {
    /// Header for a message carrying `payload_len` bytes.
    pub fn new(code: u8, payload_len: usize) -> Result<Self> {
        let length = payload_len
            .checked_add(LENGTH_LEN)
            .and_then(|len| u32::try_from(len).ok())
            .ok_or_else(|| {
                Error::InvalidUsage(format!(
                    "message payload of {payload_len} bytes exceeds the protocol limit"
                ))
            })?;
        Ok(Self {
            code,
            length: U32BE::new(length),
        })
    }

    /// Encoded length (payload + 4).
    pub fn length(&self) -> u32 {
        self.length.get()
    }

    /// Number of payload bytes that follow the header.
    pub fn payload_len(&self) -> Result<usize> {
        payload_len(self.length())
    }
}

/// Payload size implied by an encoded length, rejecting lengths below 4.
pub fn payload_len(length: u32) -> Result<usize> {
    let length = usize::try_from(length).map_err(|e| {
        Error::Protocol(format!("message length {length} does not fit in memory: {e}"))
    })?;
    length
        .checked_sub(LENGTH_LEN)
        .ok_or_else(|| Error::Protocol(format!("invalid message length: {length}")))
}

/// Encode the 5-byte header for a message with `payload_len` payload bytes.
pub fn encode_header(code: u8, payload_len: usize) -> Result<[u8; HEADER_LEN]> {
    let header = FrameHeader::new(code, payload_len)?;
    let mut out = [0u8; HEADER_LEN];
    out.copy_from_slice(header.as_bytes());
    Ok(out)
}

/// Decode a 5-byte header into its code and total length.
pub fn decode_header(header: &[u8; HEADER_LEN]) -> FrameHeader {
    let [code, b0, b1, b2, b3] = *header;
    FrameHeader {
        code,
        length: U32BE::new(u32::from_be_bytes([b0, b1, b2, b3])),
    }
}
