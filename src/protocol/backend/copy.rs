//! COPY protocol backend messages.

use crate::error::Result;
use crate::protocol::codec::{read_u8, read_u16};
use crate::protocol::types::FormatCode;

use super::msg_type;

/// Which sub-protocol the server switched into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// CopyInResponse: server is ready to receive COPY data.
    In,
    /// CopyOutResponse: server is about to send COPY data.
    Out,
    /// CopyBothResponse: bidirectional COPY (replication).
    Both,
}

impl CopyMode {
    /// Map a backend type byte to the copy mode it starts, if any.
    pub fn from_type_byte(type_byte: u8) -> Option<Self> {
        match type_byte {
            msg_type::COPY_IN_RESPONSE => Some(CopyMode::In),
            msg_type::COPY_OUT_RESPONSE => Some(CopyMode::Out),
            msg_type::COPY_BOTH_RESPONSE => Some(CopyMode::Both),
            _ => None,
        }
    }

    /// Backend type byte announcing this mode.
    pub fn type_byte(self) -> u8 {
        match self {
            CopyMode::In => msg_type::COPY_IN_RESPONSE,
            CopyMode::Out => msg_type::COPY_OUT_RESPONSE,
            CopyMode::Both => msg_type::COPY_BOTH_RESPONSE,
        }
    }
}

/// CopyInResponse / CopyOutResponse / CopyBothResponse payload.
///
/// All three share the same layout: overall format followed by per-column formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyResponse {
    /// Parse a copy response message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format_byte, rest) = read_u8(payload)?;
        let format = FormatCode::from_u16(u16::from(format_byte));

        let (num_columns, mut rest) = read_u16(rest)?;
        let mut column_formats = Vec::with_capacity(usize::from(num_columns));

        for _ in 0..num_columns {
            let (fmt, remaining) = read_u16(rest)?;
            column_formats.push(FormatCode::from_u16(fmt));
            rest = remaining;
        }

        Ok(Self {
            format,
            column_formats,
        })
    }

    /// Check if binary format is used.
    pub fn is_binary(&self) -> bool {
        matches!(self.format, FormatCode::Binary)
    }
}
