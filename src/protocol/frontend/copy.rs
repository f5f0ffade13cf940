//! COPY protocol frontend messages.

use crate::error::Result;
use crate::protocol::codec::MessageBuilder;
use crate::protocol::frame::{HEADER_LEN, encode_header};

/// Header of a CopyData message carrying `payload_len` bytes.
///
/// The payload itself is written separately so large chunks are never copied.
pub fn copy_data_header(payload_len: usize) -> Result<[u8; HEADER_LEN]> {
    encode_header(super::msg_type::COPY_DATA, payload_len)
}

/// Write a CopyDone message.
pub fn write_copy_done(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::COPY_DONE);
    msg.finish();
}

/// Write a CopyFail message.
pub fn write_copy_fail(buf: &mut Vec<u8>, error_message: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.write_cstr(error_message);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_data_header() {
        let header = copy_data_header(b"hello\tworld\n".len()).unwrap();

        assert_eq!(header[0], b'd');
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        assert_eq!(len, 16);
    }

    #[test]
    fn test_copy_done() {
        let mut buf = Vec::new();
        write_copy_done(&mut buf);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], b'c');
        assert_eq!(&buf[1..5], &4_i32.to_be_bytes());
    }

    #[test]
    fn test_copy_fail() {
        let mut buf = Vec::new();
        write_copy_fail(&mut buf, "error occurred");

        assert_eq!(buf[0], b'f');
        assert_eq!(&buf[1..5], &19_u32.to_be_bytes());
        assert_eq!(&buf[5..], b"error occurred\0");
    }
}
