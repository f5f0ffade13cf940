//! Simple query protocol messages.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message.
///
/// COPY statements are always issued through the simple query protocol;
/// the server answers with a copy response instead of a row description.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}

/// Write a Terminate message.
pub fn write_terminate(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::TERMINATE);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_query() {
        let mut buf = Vec::new();
        write_query(&mut buf, "COPY t TO STDOUT");

        assert_eq!(buf[0], b'Q');

        // 4 (length field) + 16 (query) + 1 (null terminator)
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 21);
        assert_eq!(&buf[5..], b"COPY t TO STDOUT\0");
    }

    #[test]
    fn test_terminate() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);
        assert_eq!(buf, [b'X', 0, 0, 0, 4]);
    }
}
