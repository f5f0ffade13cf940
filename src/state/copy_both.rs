//! Bidirectional COPY state machine (replication streams).

use crate::error::{Error, Result};
use crate::opts::CopyOpts;
use crate::protocol::backend::{CommandComplete, CopyResponse, msg_type};
use crate::transport::{self, Attachment, Transport};

use super::action::AsyncMessage;
use super::completion::Completion;
use super::copy_in::{FrameWriter, WriteStatus};
use super::decoder::{Decoded, Decoder};

/// Copy-both duplex: a copy-out decoder for the server's stream and a
/// copy-in encoder for the client's, opened by one CopyBothResponse.
///
/// Writes made before the CopyBothResponse are held back and flushed once it
/// arrives. Either side may end first. Closing the connection before the
/// server's CopyDone is an error.
#[derive(Debug)]
pub struct CopyBothStateMachine {
    decoder: Decoder,
    attachment: Option<Attachment>,
    writer: FrameWriter,
    response: Option<CopyResponse>,
    data_ended: bool,
    error: Option<Error>,
    completion: Completion<u64>,
}

impl CopyBothStateMachine {
    /// Create a duplex. Nothing is attached yet.
    pub fn new(opts: &CopyOpts) -> Self {
        Self {
            decoder: Decoder::new(
                msg_type::COPY_BOTH_RESPONSE,
                opts.read_high_water_mark,
                opts.align_on_frame,
            ),
            attachment: None,
            writer: FrameWriter::new(opts.write_high_water_mark),
            response: None,
            data_ended: false,
            error: None,
            completion: Completion::new(),
        }
    }

    /// Take ownership of the transport's inbound bytes.
    pub fn attach<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if self.attachment.is_some() {
            return Err(Error::InvalidUsage("COPY BOTH is already attached".into()));
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
                "COPY BOTH received bytes while detached".into(),
            ));
        }
        self.decoder.extend(bytes);
        self.pump(transport);
        Ok(())
    }

    /// Next decoded chunk from the server, if any.
    pub fn next_chunk<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Option<Vec<u8>> {
        let chunk = self.decoder.next_chunk();
        if chunk.is_some() {
            self.pump(transport);
        }
        chunk
    }

    /// True once the server's CopyDone was decoded and every chunk was taken.
    pub fn is_data_ended(&self) -> bool {
        self.data_ended && !self.decoder.has_output()
    }

    /// Submit one chunk for the server.
    pub fn write<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        chunk: Vec<u8>,
    ) -> Result<WriteStatus> {
        if !self.completion.is_pending() {
            return Ok(WriteStatus::Closed);
        }
        self.writer.submit(transport, chunk)
    }

    /// End the client's side with CopyDone after every pending chunk.
    pub fn finish<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if !self.completion.is_pending() {
            return Ok(());
        }
        self.writer.finish(transport)
    }

    /// End the client's side and stop delivering server data.
    pub fn discard<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.decoder.discard_output();
        self.pump(transport);
        self.finish(transport)
    }

    /// CopyData frames received from the server.
    pub fn row_count(&self) -> u64 {
        self.decoder.rows()
    }

    /// The CopyBothResponse, once received.
    pub fn response(&self) -> Option<&CopyResponse> {
        self.response.as_ref()
    }

    /// Pass-through messages received while attached.
    pub fn take_async_messages(&mut self) -> Vec<AsyncMessage> {
        self.decoder.take_async_messages()
    }

    /// The transport accepted the queued bytes.
    pub fn handle_drain<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if let Err(error) = self.writer.drained(transport) {
            self.record_error(error);
        }
    }

    /// CommandComplete after both sides ended. The tag carries no count.
    pub fn handle_command_complete(&mut self, complete: &CommandComplete<'_>) {
        tracing::trace!(tag = complete.tag, "COPY BOTH command complete");
    }

    /// ErrorResponse parsed by the dispatcher.
    pub fn handle_error<T: Transport + ?Sized>(&mut self, transport: &mut T, error: Error) {
        self.detach(transport);
        self.writer.close();
        self.record_error(error);
    }

    /// ReadyForQuery: resolve the outcome.
    pub fn handle_ready_for_query<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        self.detach(transport);
        self.writer.close();
        if !self.completion.is_pending() {
            return;
        }
        let result = match self.error.take() {
            Some(error) => Err(error),
            None if self.response.is_none() => Err(Error::Protocol(
                "server did not enter COPY BOTH mode".into(),
            )),
            None if !self.data_ended => Err(Error::Protocol(
                "ReadyForQuery received before CopyDone".into(),
            )),
            None => Ok(self.row_count()),
        };
        tracing::debug!(rows = self.row_count(), ok = result.is_ok(), "COPY BOTH complete");
        self.completion.complete(result);
    }

    /// The transport failed or closed.
    pub fn handle_transport_error<T: Transport + ?Sized>(&mut self, transport: &mut T, error: Error) {
        self.detach(transport);
        self.writer.close();
        if self.completion.is_pending() {
            let error = self.error.take().unwrap_or(error);
            self.completion.complete(Err(error));
        }
    }

    /// True while progress depends on the server rather than the caller.
    pub fn is_awaiting_server(&self) -> bool {
        self.completion.is_pending()
            && (!self.data_ended
                || self.writer.terminator_sent()
                || self.writer.is_closed()
                || self.error.is_some())
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
                        tracing::trace!("COPY BOTH consumer is behind, pausing transport");
                        transport.pause();
                    }
                    return;
                }
                Ok(Decoded::Started(response)) => {
                    tracing::debug!(binary = response.is_binary(), "COPY BOTH started");
                    self.response = Some(response);
                    if let Err(error) = self.writer.confirm(transport) {
                        self.record_error(error);
                    }
                }
                Ok(Decoded::Done) => {
                    tracing::debug!("server ended COPY BOTH stream");
                    self.data_ended = true;
                    self.detach(transport);
                }
                Ok(Decoded::ServerError) => {
                    self.detach(transport);
                }
                Err(error) => {
                    tracing::warn!(%error, "COPY BOTH stream violated the protocol");
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
