//! Synchronous connection driver.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::handler::AsyncMessageHandler;
use crate::opts::CopyOpts;
use crate::protocol::backend::CopyMode;
use crate::protocol::frontend::write_terminate;
use crate::protocol::types::TransactionStatus;
use crate::state::action::Action;
use crate::state::session::Session;

use super::copy::{CopyBoth, CopyIn, CopyOut};
use super::stream::Stream;

/// Synchronous connection running COPY operations over a blocking stream.
///
/// The stream must already be authenticated and ready for a query; this
/// type only speaks the simple query and COPY sub-protocols.
pub struct Conn<S: Read + Write> {
    pub(super) stream: Stream<S>,
    pub(super) session: Session,
    opts: CopyOpts,
    async_message_handler: Option<Box<dyn AsyncMessageHandler>>,
    terminated: bool,
}

impl<S: Read + Write> Conn<S> {
    /// Wrap an authenticated stream with default COPY options.
    pub fn new(stream: S) -> Self {
        Self::with_opts(stream, CopyOpts::default())
    }

    /// Wrap an authenticated stream. `opts` apply to every COPY started
    /// without explicit options.
    pub fn with_opts(stream: S, opts: CopyOpts) -> Self {
        Self {
            stream: Stream::new(stream, opts.read_chunk_size),
            session: Session::new(),
            opts,
            async_message_handler: None,
            terminated: false,
        }
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.transaction_status()
    }

    /// Check if currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.session.transaction_status().in_transaction()
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.session.is_broken()
    }

    /// Set the async message handler.
    ///
    /// The handler is called when the server sends asynchronous messages:
    /// - `Notification` - from LISTEN/NOTIFY
    /// - `Notice` - warnings and informational messages
    /// - `ParameterChanged` - server parameter updates
    pub fn set_async_message_handler<H: AsyncMessageHandler + 'static>(&mut self, handler: H) {
        self.async_message_handler = Some(Box::new(handler));
    }

    /// Remove the async message handler.
    pub fn clear_async_message_handler(&mut self) {
        self.async_message_handler = None;
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Start `COPY ... TO STDOUT`.
    pub fn copy_out(&mut self, sql: &str) -> Result<CopyOut<'_, S>> {
        let opts = self.opts.clone();
        self.copy_out_with(sql, &opts)
    }

    /// Start `COPY ... TO STDOUT` with explicit options.
    pub fn copy_out_with(&mut self, sql: &str, opts: &CopyOpts) -> Result<CopyOut<'_, S>> {
        self.start(sql, CopyMode::Out, opts)?;
        Ok(CopyOut::new(self, opts.abort_message.clone()))
    }

    /// Start `COPY ... FROM STDIN`.
    pub fn copy_in(&mut self, sql: &str) -> Result<CopyIn<'_, S>> {
        let opts = self.opts.clone();
        self.copy_in_with(sql, &opts)
    }

    /// Start `COPY ... FROM STDIN` with explicit options.
    pub fn copy_in_with(&mut self, sql: &str, opts: &CopyOpts) -> Result<CopyIn<'_, S>> {
        self.start(sql, CopyMode::In, opts)?;
        Ok(CopyIn::new(self, opts.abort_message.clone()))
    }

    /// Start a command answered with CopyBothResponse, e.g. `START_REPLICATION`.
    pub fn copy_both(&mut self, sql: &str, opts: &CopyOpts) -> Result<CopyBoth<'_, S>> {
        self.start(sql, CopyMode::Both, opts)?;
        Ok(CopyBoth::new(self, opts.abort_message.clone()))
    }

    /// Execute a simple query and discard results.
    pub fn query_drop(&mut self, sql: &str) -> Result<Option<u64>> {
        self.recover()?;
        self.session.start_query(sql)?;
        loop {
            if let Some(outcome) = self.session.take_query_outcome() {
                return outcome;
            }
            if !self.step()? {
                return Err(stalled());
            }
        }
    }

    /// Ping the server with an empty query to check connection aliveness.
    pub fn ping(&mut self) -> Result<()> {
        self.query_drop("")?;
        Ok(())
    }

    /// Close the connection gracefully.
    pub fn close(mut self) -> Result<()> {
        self.terminate()
    }

    fn start(&mut self, sql: &str, mode: CopyMode, opts: &CopyOpts) -> Result<()> {
        self.recover()?;
        self.session.start_copy(sql, mode, opts)?;
        self.flush()
    }

    /// Drive an abandoned command to ReadyForQuery.
    fn recover(&mut self) -> Result<()> {
        if !self.session.is_idle() {
            self.session.abandon(&self.opts.abort_message);
        }
        while !self.session.is_idle() {
            if !self.step()? {
                return Err(Error::InvalidUsage(
                    "previous command is still in progress".into(),
                ));
            }
        }
        Ok(())
    }

    /// Write out queued bytes, if any.
    pub(super) fn flush(&mut self) -> Result<()> {
        while self.session.poll_io() == Action::Write {
            self.step()?;
        }
        Ok(())
    }

    /// Perform the I/O the session asks for. Returns `false` when it has
    /// nothing to do until the caller acts.
    pub(super) fn step(&mut self) -> Result<bool> {
        let result = self.step_inner();
        if let Err(error @ Error::Io(_)) = &result {
            self.session.connection_lost(error.duplicate());
        }
        self.dispatch_async_messages();
        result
    }

    fn step_inner(&mut self) -> Result<bool> {
        match self.session.poll_io() {
            Action::Write => {
                self.stream.write_all(self.session.write_buffer())?;
                self.stream.flush()?;
                self.session.flushed();
            }
            Action::Read => {
                let chunk = self.stream.read_chunk()?;
                if chunk.is_empty() {
                    self.session.connection_lost(Error::unexpected_eof());
                } else {
                    self.session.receive(chunk)?;
                }
            }
            Action::Yield => return Ok(false),
        }
        Ok(true)
    }

    fn dispatch_async_messages(&mut self) {
        while let Some(message) = self.session.pop_async_message() {
            match &mut self.async_message_handler {
                Some(handler) => handler.handle(&message),
                None => tracing::trace!(?message, "async message without handler"),
            }
        }
    }

    fn terminate(&mut self) -> Result<()> {
        self.terminated = true;
        let mut buf = Vec::with_capacity(5);
        write_terminate(&mut buf);
        self.stream.write_all(&buf)?;
        self.stream.flush()?;
        Ok(())
    }
}

impl<S: Read + Write> Drop for Conn<S> {
    fn drop(&mut self) {
        // Try to send Terminate message, ignore errors
        if !self.terminated && !self.session.is_broken() {
            let _ = self.terminate();
        }
    }
}

pub(super) fn stalled() -> Error {
    Error::InvalidUsage("COPY cannot make progress until the caller reads or writes".into())
}
