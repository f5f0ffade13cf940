//! COPY TO STDOUT state machine.

use crate::error::{Error, Result};
use crate::opts::CopyOpts;
use crate::protocol::backend::{CommandComplete, CopyResponse, msg_type};
use crate::transport::{self, Attachment, Transport};

use super::action::AsyncMessage;
use super::completion::Completion;
use super::decoder::{Decoded, Decoder};

/// Copy-out decoder: turns the server's CopyData stream back into the
/// bytes the COPY produced.
///
/// While attached it owns the transport's inbound bytes. It detaches on
/// CopyDone, on an ErrorResponse, or on a protocol violation, restoring
/// every byte it did not consume. The operation completes when the
/// dispatcher reports ReadyForQuery.
#[derive(Debug)]
pub struct CopyOutStateMachine {
    decoder: Decoder,
    attachment: Option<Attachment>,
    response: Option<CopyResponse>,
    server_count: Option<u64>,
    data_ended: bool,
    error: Option<Error>,
    completion: Completion<u64>,
}

impl CopyOutStateMachine {
    /// Create a copy-out decoder. Nothing is attached yet.
    pub fn new(opts: &CopyOpts) -> Self {
        Self {
            decoder: Decoder::new(
                msg_type::COPY_OUT_RESPONSE,
                opts.read_high_water_mark,
                opts.align_on_frame,
            ),
            attachment: None,
            response: None,
            server_count: None,
            data_ended: false,
            error: None,
            completion: Completion::new(),
        }
    }

    /// Take ownership of the transport's inbound bytes.
    pub fn attach<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if self.attachment.is_some() {
            return Err(Error::InvalidUsage("COPY OUT is already attached".into()));
        }
        self.attachment = Some(Attachment::acquire(transport)?);
        Ok(())
    }

    /// True while inbound bytes must be routed here.
    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Feed inbound bytes received while attached.
    pub fn accept_bytes<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        bytes: &[u8],
    ) -> Result<()> {
        if self.attachment.is_none() {
            return Err(Error::InvalidUsage(
                "COPY OUT received bytes while detached".into(),
            ));
        }
        self.decoder.extend(bytes);
        self.pump(transport);
        Ok(())
    }

    /// Next decoded chunk, if any.
    ///
    /// Taking output below the high water mark lets decoding continue.
    pub fn next_chunk<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Option<Vec<u8>> {
        let chunk = self.decoder.next_chunk();
        if chunk.is_some() {
            self.pump(transport);
        }
        chunk
    }

    /// True once CopyDone was decoded and every chunk was taken.
    pub fn is_data_ended(&self) -> bool {
        self.data_ended && !self.decoder.has_output()
    }

    /// Stop delivering data. Remaining frames are still consumed and counted.
    pub fn discard<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        self.decoder.discard_output();
        self.pump(transport);
    }

    /// Server-reported row count if known, otherwise CopyData frames received.
    pub fn row_count(&self) -> u64 {
        self.server_count.unwrap_or_else(|| self.decoder.rows())
    }

    /// The CopyOutResponse, once received.
    pub fn response(&self) -> Option<&CopyResponse> {
        self.response.as_ref()
    }

    /// Pass-through messages received while attached.
    pub fn take_async_messages(&mut self) -> Vec<AsyncMessage> {
        self.decoder.take_async_messages()
    }

    /// Apply the `COPY n` tag.
    pub fn handle_command_complete(&mut self, complete: &CommandComplete<'_>) {
        if let Some(count) = complete.copy_count() {
            self.server_count = Some(count);
        }
    }

    /// ErrorResponse parsed by the dispatcher.
    pub fn handle_error<T: Transport + ?Sized>(&mut self, transport: &mut T, error: Error) {
        self.detach(transport);
        self.record_error(error);
    }

    /// ReadyForQuery: resolve the outcome.
    pub fn handle_ready_for_query<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        self.detach(transport);
        if !self.completion.is_pending() {
            return;
        }
        let result = match self.error.take() {
            Some(error) => Err(error),
            None if !self.data_ended => Err(Error::Protocol(
                "ReadyForQuery received before CopyDone".into(),
            )),
            None => Ok(self.row_count()),
        };
        tracing::debug!(rows = self.row_count(), ok = result.is_ok(), "COPY OUT complete");
        self.completion.complete(result);
    }

    /// The transport failed or closed.
    pub fn handle_transport_error<T: Transport + ?Sized>(&mut self, transport: &mut T, error: Error) {
        self.detach(transport);
        if self.completion.is_pending() {
            let error = self.error.take().unwrap_or(error);
            self.completion.complete(Err(error));
        }
    }

    /// True until the outcome is resolved.
    pub fn is_pending(&self) -> bool {
        self.completion.is_pending()
    }

    /// Take the resolved outcome.
    pub fn take_outcome(&mut self) -> Option<Result<u64>> {
        self.completion.take()
    }

    fn pump<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        while self.attachment.is_some() {
            match self.decoder.decode() {
                Ok(Decoded::NeedMore) => {
                    if transport.is_paused() {
                        transport.resume();
                    }
                    return;
                }
                Ok(Decoded::Saturated) => {
                    if !transport.is_paused() {
                        tracing::trace!("COPY OUT consumer is behind, pausing transport");
                        transport.pause();
                    }
                    return;
                }
                Ok(Decoded::Started(response)) => {
                    tracing::debug!(
                        binary = response.is_binary(),
                        columns = response.column_formats.len(),
                        "COPY OUT started"
                    );
                    self.response = Some(response);
                }
                Ok(Decoded::Done) => {
                    self.data_ended = true;
                    self.detach(transport);
                }
                Ok(Decoded::ServerError) => {
                    self.detach(transport);
                }
                Err(error) => {
                    tracing::warn!(%error, "COPY OUT stream violated the protocol");
                    self.record_error(error);
                    self.detach(transport);
                }
            }
        }
    }

    fn detach<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if self.attachment.is_some() {
            let unconsumed = self.decoder.take_unconsumed();
            transport::detach(&mut self.attachment, transport, &unconsumed);
        }
    }

    fn record_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, Receiver};

    const COPY_OUT_RESPONSE: &[u8] = &[b'H', 0, 0, 0, 9, 0, 0, 1, 0, 0];
    const ROW: &[u8] = &[b'd', 0, 0, 0, 7, b'x', b'y', b'\n'];
    const COPY_DONE: &[u8] = &[b'c', 0, 0, 0, 4];
    const COMMAND_COMPLETE: &[u8] = b"C\0\0\0\x0bCOPY 1\0";
    const READY: &[u8] = &[b'Z', 0, 0, 0, 5, b'I'];

    fn server_bytes() -> Vec<u8> {
        [COPY_OUT_RESPONSE, ROW, COPY_DONE, COMMAND_COMPLETE, READY].concat()
    }

    fn drain(copy: &mut CopyOutStateMachine, transport: &mut MockTransport) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = copy.next_chunk(transport) {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[test]
    fn every_split_point_yields_same_output() {
        let input = server_bytes();
        let tail = [COMMAND_COMPLETE, READY].concat();
        for split in 0..=input.len() {
            let mut transport = MockTransport::new();
            let mut copy = CopyOutStateMachine::new(&CopyOpts::default());
            copy.attach(&mut transport).unwrap();

            let (head, rest) = input.split_at(split);
            copy.accept_bytes(&mut transport, head).unwrap();
            let mut output = drain(&mut copy, &mut transport);
            if copy.is_attached() {
                copy.accept_bytes(&mut transport, rest).unwrap();
                output.extend(drain(&mut copy, &mut transport));
                assert_eq!(transport.restored, tail, "split at {split}");
            } else {
                let mut restored = transport.restored.clone();
                restored.extend_from_slice(rest);
                assert_eq!(restored, tail, "split at {split}");
            }

            assert_eq!(output, b"xy\n", "split at {split}");
            assert!(copy.is_data_ended());
            assert_eq!(transport.receiver, Receiver::Dispatcher);
        }
    }

    #[test]
    fn combines_rows_delivered_together() {
        let mut transport = MockTransport::new();
        let mut copy = CopyOutStateMachine::new(&CopyOpts::default());
        copy.attach(&mut transport).unwrap();
        let input = [COPY_OUT_RESPONSE, ROW, ROW, ROW, COPY_DONE].concat();
        copy.accept_bytes(&mut transport, &input).unwrap();
        assert_eq!(copy.next_chunk(&mut transport).unwrap(), b"xy\nxy\nxy\n");
        assert!(copy.next_chunk(&mut transport).is_none());
        assert_eq!(copy.row_count(), 3);
    }

    #[test]
    fn completes_with_server_count() {
        let mut transport = MockTransport::new();
        let mut copy = CopyOutStateMachine::new(&CopyOpts::default());
        copy.attach(&mut transport).unwrap();
        copy.accept_bytes(&mut transport, &server_bytes()).unwrap();
        assert_eq!(drain(&mut copy, &mut transport), b"xy\n");

        copy.handle_command_complete(&CommandComplete::parse(b"COPY 1\0").unwrap());
        copy.handle_ready_for_query(&mut transport);
        assert_eq!(copy.take_outcome().unwrap().unwrap(), 1);
        assert!(copy.take_outcome().is_none());
    }

    #[test]
    fn error_in_place_of_response_is_restored() {
        let mut transport = MockTransport::new();
        let mut copy = CopyOutStateMachine::new(&CopyOpts::default());
        copy.attach(&mut transport).unwrap();
        let error = b"E\0\0\0\x0cSERROR\0\0".to_vec();
        copy.accept_bytes(&mut transport, &error).unwrap();

        assert!(!copy.is_attached());
        assert_eq!(transport.restored, error);
        assert!(copy.next_chunk(&mut transport).is_none());

        copy.handle_error(
            &mut transport,
            Error::Server(crate::error::ErrorFields::default()),
        );
        copy.handle_ready_for_query(&mut transport);
        assert!(matches!(copy.take_outcome(), Some(Err(Error::Server(_)))));
        assert_eq!(copy.row_count(), 0);
    }

    #[test]
    fn notices_pass_through() {
        let mut transport = MockTransport::new();
        let mut copy = CopyOutStateMachine::new(&CopyOpts::default());
        copy.attach(&mut transport).unwrap();
        let notice = b"N\0\0\0\x11SNOTICE\0Mhi\0\0".to_vec();
        let input = [COPY_OUT_RESPONSE, &notice, ROW, COPY_DONE].concat();
        copy.accept_bytes(&mut transport, &input).unwrap();
        assert_eq!(drain(&mut copy, &mut transport), b"xy\n");
        assert_eq!(copy.take_async_messages().len(), 1);
    }

    #[test]
    fn pauses_until_consumer_catches_up() {
        let mut transport = MockTransport::new();
        let opts = CopyOpts::default().read_high_water_mark(2);
        let mut copy = CopyOutStateMachine::new(&opts);
        copy.attach(&mut transport).unwrap();
        let input = [COPY_OUT_RESPONSE, ROW, COPY_DONE].concat();
        copy.accept_bytes(&mut transport, &input).unwrap();
        assert!(transport.paused);

        assert_eq!(copy.next_chunk(&mut transport).unwrap(), b"xy");
        assert_eq!(copy.next_chunk(&mut transport).unwrap(), b"\n");
        assert!(!transport.paused);
        assert!(copy.is_data_ended());
    }

    #[test]
    fn second_response_is_a_protocol_error() {
        let mut transport = MockTransport::new();
        let mut copy = CopyOutStateMachine::new(&CopyOpts::default());
        copy.attach(&mut transport).unwrap();
        let input = [COPY_OUT_RESPONSE, COPY_OUT_RESPONSE].concat();
        copy.accept_bytes(&mut transport, &input).unwrap();
        assert!(!copy.is_attached());
        assert_eq!(transport.restored, COPY_OUT_RESPONSE);

        copy.handle_ready_for_query(&mut transport);
        assert!(matches!(copy.take_outcome(), Some(Err(Error::Protocol(_)))));
    }

    #[test]
    fn connection_loss_completes_immediately() {
        let mut transport = MockTransport::new();
        let mut copy = CopyOutStateMachine::new(&CopyOpts::default());
        copy.attach(&mut transport).unwrap();
        copy.accept_bytes(&mut transport, COPY_OUT_RESPONSE).unwrap();
        copy.handle_transport_error(&mut transport, Error::unexpected_eof());
        assert!(!copy.is_pending());
        assert!(matches!(copy.take_outcome(), Some(Err(Error::Io(_)))));
        assert_eq!(transport.receiver, Receiver::Dispatcher);
    }
}
