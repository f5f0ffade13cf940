//! COPY handles for the tokio driver.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::protocol::backend::CopyResponse;
use crate::state::copy_in::WriteStatus;

use super::conn::{Conn, stalled};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Active,
    Finished,
    Failed,
}

fn ensure_active(state: HandleState) -> Result<()> {
    match state {
        HandleState::Active => Ok(()),
        HandleState::Finished => Err(Error::InvalidUsage("COPY already finished".into())),
        HandleState::Failed => Err(Error::InvalidUsage("COPY already failed".into())),
    }
}

/// Next decoded chunk, or `None` once the server's data ended.
async fn read_next<S: AsyncRead + AsyncWrite + Unpin>(conn: &mut Conn<S>) -> Result<Option<Vec<u8>>> {
    loop {
        if let Some(chunk) = conn.session.next_chunk()? {
            return Ok(Some(chunk));
        }
        if conn.session.is_copy_data_ended() {
            return Ok(None);
        }
        if !conn.session.is_copy_pending() {
            return match conn.session.take_copy_outcome() {
                Some(Err(error)) => Err(error),
                _ => Ok(None),
            };
        }
        if !conn.step().await? {
            return Err(stalled());
        }
    }
}

async fn write_chunk<S: AsyncRead + AsyncWrite + Unpin>(conn: &mut Conn<S>, data: &[u8]) -> Result<()> {
    loop {
        match conn.session.write_copy(data.to_vec())? {
            WriteStatus::Accepted => break,
            WriteStatus::WouldBlock => {
                if !conn.step().await? {
                    return Err(stalled());
                }
            }
            WriteStatus::Closed => {
                // The server ended the COPY; its verdict explains why.
                return Err(match complete(conn).await {
                    Err(error) => error,
                    Ok(_) => Error::Protocol("server ended COPY before the client".into()),
                });
            }
        }
    }
    if conn.session.should_flush() {
        conn.flush().await?;
    }
    Ok(())
}

/// Drive the COPY to ReadyForQuery, dropping unread data, and take its outcome.
async fn complete<S: AsyncRead + AsyncWrite + Unpin>(conn: &mut Conn<S>) -> Result<u64> {
    loop {
        while conn.session.next_chunk()?.is_some() {}
        if !conn.session.is_copy_pending() {
            break;
        }
        if !conn.step().await? {
            return Err(stalled());
        }
    }
    conn.session
        .take_copy_outcome()
        .unwrap_or_else(|| Err(Error::InvalidUsage("COPY outcome already taken".into())))
}

fn settle(result: &Result<impl Sized>) -> HandleState {
    if result.is_ok() {
        HandleState::Finished
    } else {
        HandleState::Failed
    }
}

/// Running `COPY ... TO STDOUT`.
///
/// Dropping the handle before [`finish`](Self::finish) discards the rest of
/// the data; the connection catches up on its next use.
pub struct CopyOut<'a, S: AsyncRead + AsyncWrite + Unpin> {
    conn: &'a mut Conn<S>,
    state: HandleState,
    abort_message: String,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> CopyOut<'a, S> {
    pub(super) fn new(conn: &'a mut Conn<S>, abort_message: String) -> Self {
        Self {
            conn,
            state: HandleState::Active,
            abort_message,
        }
    }

    /// Next chunk of COPY data, or `None` once the server's data ended.
    ///
    /// Chunks follow the server's bytes, not row boundaries.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>> {
        if self.state == HandleState::Finished {
            return Ok(None);
        }
        ensure_active(self.state)?;
        let result = read_next(self.conn).await;
        if result.is_err() && self.conn.session.is_idle() {
            self.state = HandleState::Failed;
        }
        result
    }

    /// Read everything into one buffer and finish.
    pub async fn read_to_end(mut self) -> Result<(Vec<u8>, u64)> {
        let mut data = Vec::new();
        while let Some(chunk) = self.read().await? {
            data.extend_from_slice(&chunk);
        }
        let rows = self.finish().await?;
        Ok((data, rows))
    }

    /// Rows received so far, or the server's count once reported.
    pub fn row_count(&self) -> u64 {
        self.conn.session.copy_row_count().unwrap_or(0)
    }

    /// The CopyOutResponse, once received.
    pub fn response(&self) -> Option<&CopyResponse> {
        self.conn.session.copy_response()
    }

    /// Wait for the server to complete the COPY. Unread data is discarded.
    pub async fn finish(mut self) -> Result<u64> {
        ensure_active(self.state)?;
        let result = complete(self.conn).await;
        self.state = settle(&result);
        result
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Drop for CopyOut<'_, S> {
    fn drop(&mut self) {
        if self.state == HandleState::Active {
            self.conn.session.abandon(&self.abort_message);
        }
    }
}

/// Running `COPY ... FROM STDIN`.
///
/// Dropping the handle before [`finish`](Self::finish) sends CopyFail; the
/// connection catches up on its next use.
pub struct CopyIn<'a, S: AsyncRead + AsyncWrite + Unpin> {
    conn: &'a mut Conn<S>,
    state: HandleState,
    abort_message: String,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> CopyIn<'a, S> {
    pub(super) fn new(conn: &'a mut Conn<S>, abort_message: String) -> Self {
        Self {
            conn,
            state: HandleState::Active,
            abort_message,
        }
    }

    /// Send one chunk of COPY data. Chunks need not align with rows.
    ///
    /// Waits while too much data is pending for the server.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        ensure_active(self.state)?;
        let result = write_chunk(self.conn, data).await;
        if result.is_err() && self.conn.session.is_idle() {
            self.state = HandleState::Failed;
        }
        result
    }

    /// Non-empty chunks written so far, or the server's count once reported.
    pub fn row_count(&self) -> u64 {
        self.conn.session.copy_row_count().unwrap_or(0)
    }

    /// The CopyInResponse, once received.
    pub fn response(&self) -> Option<&CopyResponse> {
        self.conn.session.copy_response()
    }

    /// Send CopyDone and wait for the server's row count.
    pub async fn finish(mut self) -> Result<u64> {
        ensure_active(self.state)?;
        let result = match self.conn.session.finish_copy() {
            Ok(()) => complete(self.conn).await,
            Err(error) => Err(error),
        };
        self.state = settle(&result);
        result
    }

    /// Cancel the COPY with `reason`. Nothing written so far is kept.
    ///
    /// Returns the error that ended the COPY: normally the server's
    /// acknowledgement (SQLSTATE 57014, "COPY from stdin failed"), or
    /// [`Error::CopyAborted`] when the server ended without acknowledging it.
    pub async fn abort(mut self, reason: &str) -> Error {
        if let Err(error) = ensure_active(self.state) {
            return error;
        }
        self.state = HandleState::Failed;
        if let Err(error) = self.conn.session.abort_copy(reason) {
            return error;
        }
        match complete(self.conn).await {
            Err(error) => error,
            Ok(_) => Error::CopyAborted(reason.to_string()),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Drop for CopyIn<'_, S> {
    fn drop(&mut self) {
        if self.state == HandleState::Active {
            self.conn.session.abandon(&self.abort_message);
        }
    }
}

/// Running copy-both stream, e.g. physical or logical replication.
pub struct CopyBoth<'a, S: AsyncRead + AsyncWrite + Unpin> {
    conn: &'a mut Conn<S>,
    state: HandleState,
    abort_message: String,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> CopyBoth<'a, S> {
    pub(super) fn new(conn: &'a mut Conn<S>, abort_message: String) -> Self {
        Self {
            conn,
            state: HandleState::Active,
            abort_message,
        }
    }

    /// Next chunk from the server, or `None` once it sent CopyDone.
    ///
    /// Waits until data arrives. With `align_on_frame`, each chunk is
    /// exactly one CopyData payload.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>> {
        if self.state == HandleState::Finished {
            return Ok(None);
        }
        ensure_active(self.state)?;
        let result = read_next(self.conn).await;
        if result.is_err() && self.conn.session.is_idle() {
            self.state = HandleState::Failed;
        }
        result
    }

    /// Send one CopyData message to the server.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        ensure_active(self.state)?;
        let result = write_chunk(self.conn, data).await;
        if result.is_err() && self.conn.session.is_idle() {
            self.state = HandleState::Failed;
        }
        result?;
        self.conn.flush().await
    }

    /// CopyData frames received so far.
    pub fn row_count(&self) -> u64 {
        self.conn.session.copy_row_count().unwrap_or(0)
    }

    /// The CopyBothResponse, once received.
    pub fn response(&self) -> Option<&CopyResponse> {
        self.conn.session.copy_response()
    }

    /// Send CopyDone, ending the client's side of the stream.
    ///
    /// [`read`](Self::read) keeps returning server data until the server's
    /// own CopyDone. Further writes are refused.
    pub async fn close_write(&mut self) -> Result<()> {
        ensure_active(self.state)?;
        let result = match self.conn.session.finish_copy() {
            Ok(()) => self.conn.flush().await,
            Err(error) => Err(error),
        };
        if result.is_err() && self.conn.session.is_idle() {
            self.state = HandleState::Failed;
        }
        result
    }

    /// Send CopyDone unless [`close_write`](Self::close_write) already did,
    /// drop whatever the server still sends, and wait for the command to
    /// complete.
    pub async fn finish(mut self) -> Result<u64> {
        ensure_active(self.state)?;
        let result = match self.conn.session.finish_copy() {
            Ok(()) => complete(self.conn).await,
            Err(error) => Err(error),
        };
        self.state = settle(&result);
        result
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Drop for CopyBoth<'_, S> {
    fn drop(&mut self) {
        if self.state == HandleState::Active {
            self.conn.session.abandon(&self.abort_message);
        }
    }
}
