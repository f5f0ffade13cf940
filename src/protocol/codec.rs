//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.

use crate::error::{Error, Result};
use zerocopy::FromBytes;

use super::types::{U16BE, U32BE};

/// Read 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&value, rest)) => Ok((value, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

/// Read 2-byte big-endian unsigned integer.
#[inline]
pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < 2 {
        return Err(Error::Protocol(format!(
            "read_u16: buffer too short: {} < 2",
            data.len()
        )));
    }
    let (head, rest) = data.split_at(2);
    let value = U16BE::ref_from_bytes(head)
        .map_err(|e| Error::Protocol(format!("read_u16: {e:?}")))?
        .get();
    Ok((value, rest))
}

/// Read 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::Protocol(format!(
            "read_u32: buffer too short: {} < 4",
            data.len()
        )));
    }
    let (head, rest) = data.split_at(4);
    let value = U32BE::ref_from_bytes(head)
        .map_err(|e| Error::Protocol(format!("read_u32: {e:?}")))?
        .get();
    Ok((value, rest))
}

/// Read null-terminated string (PostgreSQL String type).
/// Returns the string bytes (without the null terminator) and remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => {
            let (bytes, rest) = data.split_at(pos);
            Ok((bytes, rest.get(1..).unwrap_or_default()))
        }
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Write null-terminated string from &str.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Message builder helper that handles the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]); // Placeholder for length
        Self { buf, start }
    }

    /// Write null-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    /// Finish building the message and fill in the length field.
    pub fn finish(self) {
        let len = u32::try_from(self.buf.len() - self.start).unwrap_or(u32::MAX);
        if let Some(slot) = self.buf.get_mut(self.start..self.start + 4) {
            slot.copy_from_slice(&len.to_be_bytes());
        }
    }
}
