//! COPY FROM STDIN state machine.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::opts::CopyOpts;
use crate::protocol::backend::{CommandComplete, CopyResponse};
use crate::protocol::frame::MAX_PAYLOAD_LEN;
use crate::protocol::frontend::{copy_data_header, write_copy_done, write_copy_fail};
use crate::transport::Transport;

use super::completion::Completion;

/// Result of submitting a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The chunk was queued or written.
    Accepted,
    /// Too many bytes are pending. Retry after the transport drains.
    WouldBlock,
    /// The server ended the operation. The chunk was dropped.
    Closed,
}

/// Outbound CopyData framing shared by copy-in and copy-both.
///
/// Chunks submitted before the server's copy response are held back and
/// flushed in order once confirmed. A full transport stops flushing until
/// [`drained`](Self::drained).
#[derive(Debug)]
pub(crate) struct FrameWriter {
    pending: VecDeque<Vec<u8>>,
    pending_bytes: usize,
    high_water_mark: usize,
    confirmed: bool,
    waiting_drain: bool,
    finish_requested: bool,
    abort_message: Option<String>,
    terminator_sent: bool,
    closed: bool,
    submitted: u64,
}

impl FrameWriter {
    pub(crate) fn new(high_water_mark: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            pending_bytes: 0,
            high_water_mark: high_water_mark.max(1),
            confirmed: false,
            waiting_drain: false,
            finish_requested: false,
            abort_message: None,
            terminator_sent: false,
            closed: false,
            submitted: 0,
        }
    }

    pub(crate) fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn terminator_sent(&self) -> bool {
        self.terminator_sent
    }

    pub(crate) fn abort_message(&self) -> Option<&str> {
        self.abort_message.as_deref()
    }

    /// Non-empty chunks accepted so far.
    pub(crate) fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Bytes submitted but not yet handed to the transport.
    pub(crate) fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub(crate) fn submit<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        chunk: Vec<u8>,
    ) -> Result<WriteStatus> {
        if self.finish_requested || self.abort_message.is_some() {
            return Err(Error::InvalidUsage(
                "write after COPY was finished or aborted".into(),
            ));
        }
        if self.closed {
            return Ok(WriteStatus::Closed);
        }
        if chunk.len() > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidUsage(format!(
                "COPY chunk of {} bytes exceeds the message size limit",
                chunk.len()
            )));
        }
        if chunk.is_empty() {
            return Ok(WriteStatus::Accepted);
        }
        if self.pending_bytes >= self.high_water_mark {
            return Ok(WriteStatus::WouldBlock);
        }
        self.pending_bytes += chunk.len();
        self.pending.push_back(chunk);
        self.submitted += 1;
        self.flush(transport)?;
        Ok(WriteStatus::Accepted)
    }

    /// The server's copy response arrived.
    pub(crate) fn confirm<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.confirmed = true;
        if self.abort_message.is_some() {
            self.send_terminator(transport);
            return Ok(());
        }
        tracing::trace!(
            chunks = self.pending.len(),
            bytes = self.pending_bytes,
            "flushing chunks held before confirmation"
        );
        self.flush(transport)
    }

    /// No more chunks. CopyDone follows the pending ones.
    pub(crate) fn finish<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if self.closed || self.abort_message.is_some() {
            return Ok(());
        }
        self.finish_requested = true;
        self.flush(transport)
    }

    /// Drop pending chunks and send CopyFail, now or once confirmed.
    pub(crate) fn abort<T: Transport + ?Sized>(&mut self, transport: &mut T, message: &str) {
        if self.terminator_sent || self.closed || self.abort_message.is_some() {
            return;
        }
        self.pending.clear();
        self.pending_bytes = 0;
        self.abort_message = Some(message.to_string());
        if self.confirmed {
            self.send_terminator(transport);
        }
    }

    /// The transport accepted everything queued so far.
    pub(crate) fn drained<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if !self.waiting_drain {
            return Ok(());
        }
        self.waiting_drain = false;
        self.flush(transport)
    }

    /// The server ended the operation. Nothing else will be written.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
        self.pending_bytes = 0;
    }

    fn flush<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if !self.confirmed || self.waiting_drain || self.terminator_sent || self.closed {
            return Ok(());
        }
        while let Some(chunk) = self.pending.pop_front() {
            self.pending_bytes -= chunk.len();
            let header = copy_data_header(chunk.len())?;
            let header_fits = transport.write(&header);
            let chunk_fits = transport.write(&chunk);
            if !(header_fits && chunk_fits) {
                tracing::trace!("transport saturated, waiting for drain");
                self.waiting_drain = true;
                return Ok(());
            }
        }
        if self.finish_requested {
            self.send_terminator(transport);
        }
        Ok(())
    }

    fn send_terminator<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if self.terminator_sent {
            return;
        }
        let mut buf = Vec::new();
        match &self.abort_message {
            Some(message) => {
                tracing::debug!(message = %message, "sending CopyFail");
                write_copy_fail(&mut buf, message);
            }
            None => write_copy_done(&mut buf),
        }
        if !transport.write(&buf) {
            tracing::trace!("transport saturated by terminator, waiting for drain");
            self.waiting_drain = true;
        }
        self.terminator_sent = true;
    }
}

/// Copy-in encoder: frames caller chunks as CopyData and ends with CopyDone
/// or CopyFail.
///
/// Writes may begin before the server's CopyInResponse; they are buffered
/// and flushed in order once it arrives. The operation completes when the
/// dispatcher reports ReadyForQuery.
#[derive(Debug)]
pub struct CopyInStateMachine {
    writer: FrameWriter,
    response: Option<CopyResponse>,
    server_count: Option<u64>,
    error: Option<Error>,
    completion: Completion<u64>,
}

impl CopyInStateMachine {
    /// Create a copy-in encoder.
    pub fn new(opts: &CopyOpts) -> Self {
        Self {
            writer: FrameWriter::new(opts.write_high_water_mark),
            response: None,
            server_count: None,
            error: None,
            completion: Completion::new(),
        }
    }

    /// Submit one chunk of COPY data.
    ///
    /// Empty chunks are accepted and never framed.
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

    /// End the data. CopyDone is sent after every pending chunk.
    pub fn finish<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        if !self.completion.is_pending() {
            return Ok(());
        }
        self.writer.finish(transport)
    }

    /// Cancel with a CopyFail carrying `message`. Pending chunks are dropped.
    ///
    /// Before the CopyInResponse the CopyFail is deferred until it arrives.
    pub fn abort<T: Transport + ?Sized>(&mut self, transport: &mut T, message: &str) {
        if self.completion.is_pending() {
            self.writer.abort(transport, message);
        }
    }

    /// Bytes submitted but not yet written to the transport.
    pub fn pending_bytes(&self) -> usize {
        self.writer.pending_bytes()
    }

    /// Server-reported row count if known, otherwise non-empty chunks submitted.
    pub fn row_count(&self) -> u64 {
        self.server_count.unwrap_or_else(|| self.writer.submitted())
    }

    /// The CopyInResponse, once received.
    pub fn response(&self) -> Option<&CopyResponse> {
        self.response.as_ref()
    }

    /// CopyInResponse routed by the dispatcher.
    pub fn handle_copy_in_response<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        response: CopyResponse,
    ) {
        if self.response.is_some() {
            self.record_error(Error::Protocol(
                "Unexpected second CopyInResponse".into(),
            ));
            return;
        }
        tracing::debug!(
            binary = response.is_binary(),
            columns = response.column_formats.len(),
            "COPY IN started"
        );
        self.response = Some(response);
        if let Err(error) = self.writer.confirm(transport) {
            self.record_error(error);
        }
    }

    /// The transport accepted the queued bytes.
    pub fn handle_drain<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if let Err(error) = self.writer.drained(transport) {
            self.record_error(error);
        }
    }

    /// Apply the `COPY n` tag.
    pub fn handle_command_complete(&mut self, complete: &CommandComplete<'_>) {
        if let Some(count) = complete.copy_count() {
            self.server_count = Some(count);
        }
    }

    /// ErrorResponse parsed by the dispatcher. Pending chunks are dropped.
    pub fn handle_error(&mut self, error: Error) {
        self.writer.close();
        self.record_error(error);
    }

    /// ReadyForQuery: resolve the outcome.
    pub fn handle_ready_for_query(&mut self) {
        if !self.completion.is_pending() {
            return;
        }
        let result = if let Some(error) = self.error.take() {
            Err(error)
        } else if let Some(message) = self.writer.abort_message() {
            Err(Error::CopyAborted(message.to_string()))
        } else if self.response.is_none() {
            Err(Error::Protocol(
                "server did not enter COPY IN mode".into(),
            ))
        } else if !self.writer.terminator_sent() {
            Err(Error::Protocol(
                "ReadyForQuery received before COPY IN was finished".into(),
            ))
        } else {
            Ok(self.row_count())
        };
        self.writer.close();
        tracing::debug!(rows = self.row_count(), ok = result.is_ok(), "COPY IN complete");
        self.completion.complete(result);
    }

    /// The transport failed or closed.
    pub fn handle_transport_error(&mut self, error: Error) {
        self.writer.close();
        if self.completion.is_pending() {
            let error = self.error.take().unwrap_or(error);
            self.completion.complete(Err(error));
        }
    }

    /// True while progress depends on the server rather than the caller.
    pub fn is_awaiting_server(&self) -> bool {
        self.completion.is_pending()
            && (!self.writer.is_confirmed()
                || self.writer.terminator_sent()
                || self.writer.is_closed())
    }

    /// True until the outcome is resolved.
    pub fn is_pending(&self) -> bool {
        self.completion.is_pending()
    }

    /// Take the resolved outcome.
    pub fn take_outcome(&mut self) -> Option<Result<u64>> {
        self.completion.take()
    }

    fn record_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}
