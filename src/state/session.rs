//! Sans-I/O host connection.
//!
//! [`Session`] owns the inbound byte path of one authenticated connection.
//! Its dispatcher parses control messages (ErrorResponse, CommandComplete,
//! ReadyForQuery, copy responses, pass-through messages) and routes them to
//! the command in flight. While a copy-out or copy-both operation is
//! attached, inbound bytes bypass the dispatcher and go straight to the
//! operation's decoder until it hands the transport back.

use std::collections::VecDeque;

use crate::buffer::ReadBuffer;
use crate::error::{Error, Result};
use crate::opts::{CopyOpts, DEFAULT_HIGH_WATER_MARK};
use crate::protocol::backend::{
    CommandComplete, CopyMode, CopyResponse, ErrorResponse, RawMessage, ReadyForQuery, msg_type,
};
use crate::protocol::frame::{HEADER_LEN, decode_header};
use crate::protocol::frontend::{write_copy_done, write_copy_fail, write_query};
use crate::protocol::types::TransactionStatus;
use crate::transport::{Receiver, Transport};

use super::action::{Action, AsyncMessage};
use super::completion::Completion;
use super::copy_in::WriteStatus;
use super::operation::{CopyCodec, CopyOperation};

/// CopyFail message for a COPY FROM STDIN started outside `copy_in`.
const STRAY_COPY_IN_MESSAGE: &str = "COPY FROM STDIN is not supported by this command";

/// In-memory transport of a [`Session`].
///
/// Outbound bytes collect in a buffer the driver writes out; inbound bytes
/// not owned by a COPY operation wait in the dispatcher's read buffer.
#[derive(Debug)]
pub struct SessionTransport {
    inbound: ReadBuffer,
    outbound: Vec<u8>,
    high_water_mark: usize,
    paused: bool,
    receiver: Receiver,
}

impl SessionTransport {
    fn new() -> Self {
        Self {
            inbound: ReadBuffer::with_capacity(8192),
            outbound: Vec::with_capacity(8192),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            paused: false,
            receiver: Receiver::Dispatcher,
        }
    }
}

impl Transport for SessionTransport {
    fn receiver(&self) -> Receiver {
        self.receiver
    }

    fn set_receiver(&mut self, receiver: Receiver) {
        self.receiver = receiver;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn write(&mut self, data: &[u8]) -> bool {
        self.outbound.extend_from_slice(data);
        self.outbound.len() < self.high_water_mark
    }

    fn unshift(&mut self, data: &[u8]) {
        self.inbound.unshift(data);
    }
}

/// A simple query whose results are discarded.
#[derive(Debug, Default)]
struct QueryState {
    rows: Option<u64>,
    error: Option<Error>,
    completion: Completion<Option<u64>>,
}

impl QueryState {
    fn record_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn finish(&mut self) {
        if self.completion.is_pending() {
            let result = match self.error.take() {
                Some(error) => Err(error),
                None => Ok(self.rows),
            };
            self.completion.complete(result);
        }
    }

    fn fail(&mut self, error: Error) {
        if self.completion.is_pending() {
            let error = self.error.take().unwrap_or(error);
            self.completion.complete(Err(error));
        }
    }
}

#[derive(Debug)]
enum Command {
    Idle,
    Copy(CopyOperation),
    Query(QueryState),
}

/// Host side of one connection, driven by [`Action`]s.
#[derive(Debug)]
pub struct Session {
    transport: SessionTransport,
    command: Command,
    transaction_status: TransactionStatus,
    async_messages: VecDeque<AsyncMessage>,
    abandoned: bool,
    broken: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session for a connection that is ready for a query.
    pub fn new() -> Self {
        Self {
            transport: SessionTransport::new(),
            command: Command::Idle,
            transaction_status: TransactionStatus::Idle,
            async_messages: VecDeque::new(),
            abandoned: false,
            broken: false,
        }
    }

    /// Transaction status from the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// True once the connection failed and cannot be reused.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// True when no command is in flight and its outcome was taken.
    pub fn is_idle(&self) -> bool {
        matches!(self.command, Command::Idle)
    }

    /// Who receives inbound bytes right now.
    pub fn receiver(&self) -> Receiver {
        self.transport.receiver
    }

    /// Send `sql` and run the COPY sub-protocol it starts in `mode`.
    pub fn start_copy(&mut self, sql: &str, mode: CopyMode, opts: &CopyOpts) -> Result<()> {
        self.ensure_idle()?;
        let mut op = CopyOperation::new(mode, opts);
        op.start(&mut self.transport)?;
        self.transport.high_water_mark = opts.transport_high_water_mark;
        write_query(&mut self.transport.outbound, sql);
        tracing::debug!(?mode, sql, "starting COPY");
        self.command = Command::Copy(op);

        // Bytes already buffered belong to the new owner.
        if self.transport.receiver == Receiver::Copy && !self.transport.inbound.is_empty() {
            let buffered = self.transport.inbound.take_all();
            self.receive(&buffered)?;
        }
        Ok(())
    }

    /// Send `sql` through the simple query protocol, discarding any rows.
    pub fn start_query(&mut self, sql: &str) -> Result<()> {
        self.ensure_idle()?;
        write_query(&mut self.transport.outbound, sql);
        tracing::debug!(sql, "starting query");
        self.command = Command::Query(QueryState::default());
        Ok(())
    }

    /// Next I/O the driver should perform.
    pub fn poll_io(&self) -> Action {
        if !self.transport.outbound.is_empty() {
            return Action::Write;
        }
        let awaiting = match &self.command {
            Command::Idle => false,
            Command::Copy(op) => op.is_awaiting_server(),
            Command::Query(query) => query.completion.is_pending(),
        };
        if awaiting && !self.transport.paused {
            Action::Read
        } else {
            Action::Yield
        }
    }

    /// Bytes to write for [`Action::Write`].
    pub fn write_buffer(&self) -> &[u8] {
        &self.transport.outbound
    }

    /// True once buffered outbound bytes reached the transport's high water mark.
    pub fn should_flush(&self) -> bool {
        self.transport.outbound.len() >= self.transport.high_water_mark
    }

    /// The write buffer was written and flushed.
    pub fn flushed(&mut self) {
        self.transport.outbound.clear();
        if let Command::Copy(op) = &mut self.command {
            op.handle_drain(&mut self.transport);
        }
    }

    /// Bytes read from the server.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<()> {
        if self.transport.receiver == Receiver::Copy
            && let Command::Copy(op) = &mut self.command
        {
            op.accept_bytes(&mut self.transport, bytes)?;
        } else {
            self.transport.inbound.extend(bytes);
        }
        self.advance()
    }

    /// The connection failed or the server closed it.
    pub fn connection_lost(&mut self, error: Error) {
        tracing::warn!(%error, "connection lost");
        self.fail_command(error);
        self.settle();
    }

    /// Next decoded chunk of the COPY in flight.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Command::Copy(op) = &mut self.command else {
            return Err(no_copy());
        };
        let chunk = op.next_chunk(&mut self.transport);
        self.advance()?;
        Ok(chunk)
    }

    /// Submit a chunk to the COPY in flight.
    pub fn write_copy(&mut self, chunk: Vec<u8>) -> Result<WriteStatus> {
        let Command::Copy(op) = &mut self.command else {
            return Err(no_copy());
        };
        op.accept_write(&mut self.transport, chunk)
    }

    /// End the client's side of the COPY in flight.
    pub fn finish_copy(&mut self) -> Result<()> {
        let Command::Copy(op) = &mut self.command else {
            return Err(no_copy());
        };
        op.finalize(&mut self.transport)
    }

    /// Abort the COPY in flight with `message`.
    pub fn abort_copy(&mut self, message: &str) -> Result<()> {
        let Command::Copy(op) = &mut self.command else {
            return Err(no_copy());
        };
        op.abort(&mut self.transport, message);
        self.advance()
    }

    /// True once the server's data ended and every chunk was taken.
    pub fn is_copy_data_ended(&self) -> bool {
        match &self.command {
            Command::Copy(op) => op.is_data_ended(),
            _ => true,
        }
    }

    /// True while the COPY in flight has no outcome yet.
    pub fn is_copy_pending(&self) -> bool {
        matches!(&self.command, Command::Copy(op) if op.is_pending())
    }

    /// Rows of the COPY in flight.
    pub fn copy_row_count(&self) -> Option<u64> {
        match &self.command {
            Command::Copy(op) => Some(op.row_count()),
            _ => None,
        }
    }

    /// Copy response of the COPY in flight.
    pub fn copy_response(&self) -> Option<&CopyResponse> {
        match &self.command {
            Command::Copy(op) => op.response(),
            _ => None,
        }
    }

    /// Take the outcome of a finished COPY and return to idle.
    pub fn take_copy_outcome(&mut self) -> Option<Result<u64>> {
        let Command::Copy(op) = &mut self.command else {
            return None;
        };
        if op.is_pending() {
            return None;
        }
        let outcome = op.take_outcome();
        self.command = Command::Idle;
        outcome
    }

    /// Take the outcome of a finished query and return to idle.
    pub fn take_query_outcome(&mut self) -> Option<Result<Option<u64>>> {
        let Command::Query(query) = &mut self.command else {
            return None;
        };
        if query.completion.is_pending() {
            return None;
        }
        let outcome = query.completion.take();
        self.command = Command::Idle;
        outcome
    }

    /// The caller walked away from the command in flight.
    ///
    /// A pending COPY is aborted with `abort_message`; the session keeps
    /// consuming server messages and drops the outcome once it resolves.
    pub fn abandon(&mut self, abort_message: &str) {
        match &mut self.command {
            Command::Idle => return,
            Command::Copy(op) if op.is_pending() => {
                tracing::debug!(mode = ?op.mode(), "abandoning COPY");
                op.abort(&mut self.transport, abort_message);
                self.abandoned = true;
            }
            Command::Query(query) if query.completion.is_pending() => {
                self.abandoned = true;
            }
            Command::Copy(_) | Command::Query(_) => {
                self.command = Command::Idle;
                return;
            }
        }
        if let Err(error) = self.advance() {
            tracing::debug!(%error, "error while abandoning command");
        }
    }

    /// Next notification, notice, or parameter change.
    pub fn pop_async_message(&mut self) -> Option<AsyncMessage> {
        self.async_messages.pop_front()
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.broken {
            return Err(Error::ConnectionBroken);
        }
        if !self.is_idle() {
            return Err(Error::InvalidUsage(
                "another command is still in progress".into(),
            ));
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        self.collect_async();
        let result = self.dispatch();
        if let Err(error) = &result {
            tracing::warn!(%error, "dispatcher failed");
            self.fail_command(error.duplicate());
        }
        self.collect_async();
        self.settle();
        result
    }

    fn collect_async(&mut self) {
        if let Command::Copy(op) = &mut self.command {
            self.async_messages.extend(op.take_async_messages());
        }
    }

    fn settle(&mut self) {
        if !self.abandoned {
            return;
        }
        let finished = match &mut self.command {
            Command::Idle => true,
            Command::Copy(op) if !op.is_pending() => {
                if let Some(Err(error)) = op.take_outcome() {
                    tracing::debug!(%error, "abandoned COPY ended with error");
                }
                true
            }
            Command::Query(query) if !query.completion.is_pending() => {
                let _ = query.completion.take();
                true
            }
            _ => false,
        };
        if finished {
            self.command = Command::Idle;
            self.abandoned = false;
        }
    }

    fn fail_command(&mut self, error: Error) {
        self.broken = true;
        match &mut self.command {
            Command::Idle => {}
            Command::Copy(op) => op.handle_transport_error(&mut self.transport, error),
            Command::Query(query) => query.fail(error),
        }
    }

    fn dispatch(&mut self) -> Result<()> {
        while self.transport.receiver == Receiver::Dispatcher {
            let Some(header) = self.transport.inbound.as_slice().first_chunk::<HEADER_LEN>() else {
                break;
            };
            let header = decode_header(header);
            let code = header.code;
            let len = header.payload_len()?;
            if self.transport.inbound.len() < HEADER_LEN + len {
                break;
            }
            let _ = self.transport.inbound.take(HEADER_LEN);

            if code == msg_type::COPY_DATA {
                tracing::trace!(len, "discarding CopyData outside a COPY operation");
                let _ = self.transport.inbound.take(len);
                continue;
            }
            let payload = self.transport.inbound.take(len).to_vec();
            self.handle_message(code, &payload)?;
        }
        Ok(())
    }

    fn handle_message(&mut self, code: u8, payload: &[u8]) -> Result<()> {
        if let Some(mode) = CopyMode::from_type_byte(code) {
            let response = CopyResponse::parse(payload)?;
            let routed = match &mut self.command {
                Command::Copy(op) => op.handle_copy_response(&mut self.transport, mode, response),
                _ => false,
            };
            if !routed {
                self.handle_stray_copy(mode);
            }
            return Ok(());
        }
        match code {
            msg_type::ERROR_RESPONSE => {
                let error = ErrorResponse::parse(payload)?.into_error();
                tracing::debug!(%error, "server error");
                if error.is_connection_broken() {
                    self.broken = true;
                }
                match &mut self.command {
                    Command::Copy(op) => op.handle_error(&mut self.transport, error),
                    Command::Query(query) => query.record_error(error),
                    Command::Idle => tracing::warn!(%error, "server error while idle"),
                }
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                tracing::trace!(tag = complete.tag, "command complete");
                match &mut self.command {
                    Command::Copy(op) => op.handle_command_complete(&complete),
                    Command::Query(query) => query.rows = complete.rows_affected(),
                    Command::Idle => {}
                }
            }
            msg_type::READY_FOR_QUERY => {
                let status = ReadyForQuery::parse(payload)?
                    .transaction_status()
                    .ok_or_else(|| Error::Protocol("Unknown transaction status".into()))?;
                self.transaction_status = status;
                match &mut self.command {
                    Command::Copy(op) => op.handle_ready_for_query(&mut self.transport),
                    Command::Query(query) => query.finish(),
                    Command::Idle => tracing::warn!("ReadyForQuery while idle"),
                }
            }
            msg_type::COPY_DONE => {
                tracing::trace!("discarding CopyDone outside a COPY operation");
            }
            msg_type::NOTICE_RESPONSE
            | msg_type::NOTIFICATION_RESPONSE
            | msg_type::PARAMETER_STATUS => {
                let message = AsyncMessage::parse(&RawMessage::new(code, payload))?;
                self.async_messages.push_back(message);
            }
            msg_type::ROW_DESCRIPTION | msg_type::DATA_ROW | msg_type::EMPTY_QUERY_RESPONSE => {}
            _ => {
                return Err(Error::Protocol(format!(
                    "Unexpected message type: '{}'",
                    code as char
                )));
            }
        }
        Ok(())
    }

    /// A copy response nobody asked for. Leave the sub-protocol and fail
    /// the command in flight.
    fn handle_stray_copy(&mut self, mode: CopyMode) {
        tracing::warn!(?mode, "unexpected copy response");
        match mode {
            CopyMode::In => write_copy_fail(&mut self.transport.outbound, STRAY_COPY_IN_MESSAGE),
            CopyMode::Both => write_copy_done(&mut self.transport.outbound),
            // Its data frames are discarded as they arrive.
            CopyMode::Out => {}
        }
        let error = Error::Protocol(format!(
            "Unexpected copy response '{}'",
            mode.type_byte() as char
        ));
        match &mut self.command {
            Command::Copy(op) => op.handle_error(&mut self.transport, error),
            Command::Query(query) => query.record_error(error),
            Command::Idle => {}
        }
    }
}

fn no_copy() -> Error {
    Error::InvalidUsage("no COPY operation in progress".into())
}
