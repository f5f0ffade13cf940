//! Incremental decoder for inbound COPY frames.
//!
//! Shared by copy-out and copy-both. Bytes arrive in arbitrary pieces; the
//! decoder keeps whatever does not complete a step in its reassembly buffer
//! and never interprets a frame from partial bytes.

use std::collections::VecDeque;

use crate::buffer::ReadBuffer;
use crate::error::{Error, Result};
use crate::protocol::backend::{CopyResponse, RawMessage, msg_type};
use crate::protocol::frame;

use super::action::AsyncMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingCode,
    AwaitingLength { code: u8 },
    AwaitingPayload { code: u8, remaining: usize },
}

/// Why a decoding pass stopped.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// The reassembly buffer does not hold enough bytes for the next step.
    NeedMore,
    /// Decoded output reached the high water mark.
    Saturated,
    /// The copy response that opens the sub-protocol.
    Started(CopyResponse),
    /// CopyDone. Bytes after it are still buffered.
    Done,
    /// An ErrorResponse starts at the front of the buffer. It is left unconsumed.
    ServerError,
}

/// Decoded payload bytes waiting for the consumer.
#[derive(Debug, Default)]
struct Output {
    aligned: bool,
    /// Completed frames (aligned mode only).
    frames: VecDeque<Vec<u8>>,
    /// Streamed bytes, or the frame under construction in aligned mode.
    partial: Vec<u8>,
    /// Bytes the consumer can take right now.
    queued: usize,
}

impl Output {
    fn push(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
        if !self.aligned {
            self.queued += bytes.len();
        }
    }

    fn end_frame(&mut self) {
        if self.aligned {
            let frame = std::mem::take(&mut self.partial);
            self.queued += frame.len();
            self.frames.push_back(frame);
        }
    }

    fn pop(&mut self) -> Option<Vec<u8>> {
        if self.aligned {
            let frame = self.frames.pop_front()?;
            self.queued -= frame.len();
            Some(frame)
        } else if self.partial.is_empty() {
            None
        } else {
            self.queued = 0;
            Some(std::mem::take(&mut self.partial))
        }
    }

    fn has_data(&self) -> bool {
        if self.aligned {
            !self.frames.is_empty()
        } else {
            !self.partial.is_empty()
        }
    }

    fn clear(&mut self) {
        self.frames.clear();
        self.partial.clear();
        self.queued = 0;
    }
}

/// Frame state machine: `AwaitingCode → AwaitingLength → AwaitingPayload`.
#[derive(Debug)]
pub(crate) struct Decoder {
    state: DecodeState,
    buffer: ReadBuffer,
    start_code: u8,
    started: bool,
    output: Output,
    high_water_mark: usize,
    discard: bool,
    rows: u64,
    async_messages: Vec<AsyncMessage>,
}

impl Decoder {
    /// Decoder for a sub-protocol opened by `start_code` (`H` or `W`).
    pub(crate) fn new(start_code: u8, high_water_mark: usize, aligned: bool) -> Self {
        Self {
            state: DecodeState::AwaitingCode,
            buffer: ReadBuffer::new(),
            start_code,
            started: false,
            output: Output {
                aligned,
                ..Output::default()
            },
            high_water_mark: high_water_mark.max(1),
            discard: false,
            rows: 0,
            async_messages: Vec::new(),
        }
    }

    /// Append an inbound batch to the reassembly buffer.
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Number of CopyData frames fully received.
    pub(crate) fn rows(&self) -> u64 {
        self.rows
    }

    /// Next unit of output for the consumer.
    pub(crate) fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.output.pop()
    }

    pub(crate) fn has_output(&self) -> bool {
        self.output.has_data()
    }

    /// Drop pending output and skip payloads from now on.
    pub(crate) fn discard_output(&mut self) {
        self.discard = true;
        self.output.clear();
    }

    /// Hand over every buffered byte not yet decoded.
    pub(crate) fn take_unconsumed(&mut self) -> Vec<u8> {
        self.buffer.take_all()
    }

    pub(crate) fn take_async_messages(&mut self) -> Vec<AsyncMessage> {
        std::mem::take(&mut self.async_messages)
    }

    /// Run the state machine over the buffered bytes.
    ///
    /// Protocol violations are detected before the offending frame is
    /// consumed, so [`take_unconsumed`](Self::take_unconsumed) still returns it.
    pub(crate) fn decode(&mut self) -> Result<Decoded> {
        loop {
            if self.output.queued >= self.high_water_mark {
                return Ok(Decoded::Saturated);
            }

            match self.state {
                DecodeState::AwaitingCode => {
                    let Some(code) = self.buffer.peek_u8() else {
                        return Ok(Decoded::NeedMore);
                    };
                    if code == msg_type::ERROR_RESPONSE {
                        return Ok(Decoded::ServerError);
                    }
                    self.check_code(code)?;
                    let _ = self.buffer.take(1);
                    self.state = DecodeState::AwaitingLength { code };
                }
                DecodeState::AwaitingLength { code } => {
                    let Some(length) = self.buffer.take_array::<4>() else {
                        return Ok(Decoded::NeedMore);
                    };
                    let remaining = match frame::payload_len(u32::from_be_bytes(length)) {
                        Ok(remaining) => remaining,
                        Err(e) => {
                            self.buffer.unshift(&length);
                            self.buffer.unshift(&[code]);
                            self.state = DecodeState::AwaitingCode;
                            return Err(e);
                        }
                    };
                    self.state = DecodeState::AwaitingPayload { code, remaining };
                }
                DecodeState::AwaitingPayload {
                    code: msg_type::COPY_DATA,
                    remaining,
                } => {
                    // Streamed payloads stop at the high water mark; aligned
                    // frames only count once complete.
                    let room = if self.output.aligned {
                        remaining
                    } else {
                        remaining.min(self.high_water_mark - self.output.queued)
                    };
                    let bytes = self.buffer.take(room);
                    let taken = bytes.len();
                    if !self.discard {
                        self.output.push(bytes);
                    }
                    let remaining = remaining - taken;
                    if remaining == 0 {
                        self.rows += 1;
                        if !self.discard {
                            self.output.end_frame();
                        }
                        self.state = DecodeState::AwaitingCode;
                    } else {
                        self.state = DecodeState::AwaitingPayload {
                            code: msg_type::COPY_DATA,
                            remaining,
                        };
                        if taken == 0 {
                            return Ok(Decoded::NeedMore);
                        }
                    }
                }
                DecodeState::AwaitingPayload { code, remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(Decoded::NeedMore);
                    }
                    let payload = self.buffer.take(remaining);
                    self.state = DecodeState::AwaitingCode;

                    if code == self.start_code {
                        let response = CopyResponse::parse(payload)?;
                        self.started = true;
                        return Ok(Decoded::Started(response));
                    }
                    if code == msg_type::COPY_DONE {
                        return Ok(Decoded::Done);
                    }
                    let message = AsyncMessage::parse(&RawMessage::new(code, payload))?;
                    self.async_messages.push(message);
                }
            }
        }
    }

    fn check_code(&self, code: u8) -> Result<()> {
        if code == self.start_code {
            if self.started {
                return Err(Error::Protocol(format!(
                    "Unexpected second copy response '{}'",
                    code as char
                )));
            }
            return Ok(());
        }
        if RawMessage::is_async_type(code) {
            return Ok(());
        }
        match code {
            msg_type::COPY_DATA | msg_type::COPY_DONE if self.started => Ok(()),
            _ if !self.started => Err(Error::Protocol(format!(
                "Expected copy response '{}', got '{}'",
                self.start_code as char, code as char
            ))),
            _ => Err(Error::Protocol(format!(
                "Unexpected message in COPY mode: '{}'",
                code as char
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(code: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = frame::encode_header(code, payload.len()).unwrap().to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn started(aligned: bool) -> Decoder {
        let mut decoder = Decoder::new(b'H', 1024, aligned);
        decoder.extend(&frame(b'H', &[0, 0, 0]));
        assert!(matches!(decoder.decode(), Ok(Decoded::Started(_))));
        decoder
    }

    #[test]
    fn streams_partial_payloads() {
        let mut decoder = started(false);
        let data = frame(b'd', b"hello");
        decoder.extend(&data[..7]);
        assert!(matches!(decoder.decode(), Ok(Decoded::NeedMore)));
        assert_eq!(decoder.next_chunk().unwrap(), b"he");
        assert_eq!(decoder.rows(), 0);
        decoder.extend(&data[7..]);
        assert!(matches!(decoder.decode(), Ok(Decoded::NeedMore)));
        assert_eq!(decoder.next_chunk().unwrap(), b"llo");
        assert_eq!(decoder.rows(), 1);
    }

    #[test]
    fn aligned_mode_waits_for_whole_frame() {
        let mut decoder = started(true);
        let data = frame(b'd', b"hello");
        decoder.extend(&data[..7]);
        assert!(matches!(decoder.decode(), Ok(Decoded::NeedMore)));
        assert!(decoder.next_chunk().is_none());
        decoder.extend(&data[7..]);
        decoder.extend(&frame(b'd', b"!"));
        assert!(matches!(decoder.decode(), Ok(Decoded::NeedMore)));
        assert_eq!(decoder.next_chunk().unwrap(), b"hello");
        assert_eq!(decoder.next_chunk().unwrap(), b"!");
    }

    #[test]
    fn error_response_is_left_in_buffer() {
        let mut decoder = started(false);
        let error = frame(b'E', b"SERROR\0\0");
        decoder.extend(&error);
        assert!(matches!(decoder.decode(), Ok(Decoded::ServerError)));
        assert_eq!(decoder.take_unconsumed(), error);
    }

    #[test]
    fn second_start_is_a_violation() {
        let mut decoder = started(false);
        decoder.extend(&frame(b'H', &[0, 0, 0]));
        assert!(matches!(decoder.decode(), Err(Error::Protocol(_))));
        assert_eq!(decoder.take_unconsumed().first(), Some(&b'H'));
    }

    #[test]
    fn data_before_start_is_a_violation() {
        let mut decoder = Decoder::new(b'H', 1024, false);
        decoder.extend(&frame(b'd', b"x"));
        assert!(matches!(decoder.decode(), Err(Error::Protocol(_))));
    }

    #[test]
    fn bad_length_is_restored() {
        let mut decoder = started(false);
        decoder.extend(&[b'd', 0, 0, 0, 2]);
        assert!(decoder.decode().is_err());
        assert_eq!(decoder.take_unconsumed(), [b'd', 0, 0, 0, 2]);
    }

    #[test]
    fn async_messages_are_collected() {
        let mut decoder = started(false);
        decoder.extend(&frame(b'S', b"a\0b\0"));
        decoder.extend(&frame(b'd', b"x"));
        assert!(matches!(decoder.decode(), Ok(Decoded::NeedMore)));
        assert_eq!(decoder.take_async_messages().len(), 1);
        assert_eq!(decoder.next_chunk().unwrap(), b"x");
    }

    #[test]
    fn saturates_at_high_water_mark() {
        let mut decoder = Decoder::new(b'H', 4, false);
        decoder.extend(&frame(b'H', &[0, 0, 0]));
        assert!(matches!(decoder.decode(), Ok(Decoded::Started(_))));
        decoder.extend(&frame(b'd', b"abcdef"));
        assert!(matches!(decoder.decode(), Ok(Decoded::Saturated)));
        assert_eq!(decoder.next_chunk().unwrap(), b"abcd");
        assert!(matches!(decoder.decode(), Ok(Decoded::NeedMore)));
        assert_eq!(decoder.next_chunk().unwrap(), b"ef");
        assert_eq!(decoder.rows(), 1);
    }

    #[test]
    fn done_leaves_trailing_bytes() {
        let mut decoder = started(false);
        decoder.extend(&frame(b'c', &[]));
        decoder.extend(&frame(b'Z', b"I"));
        assert!(matches!(decoder.decode(), Ok(Decoded::Done)));
        assert_eq!(decoder.take_unconsumed(), frame(b'Z', b"I"));
    }

    #[test]
    fn discard_skips_payloads() {
        let mut decoder = started(false);
        decoder.discard_output();
        decoder.extend(&frame(b'd', b"abc"));
        assert!(matches!(decoder.decode(), Ok(Decoded::NeedMore)));
        assert!(!decoder.has_output());
        assert_eq!(decoder.rows(), 1);
    }
}
