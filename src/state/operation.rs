//! The COPY operation slot of a session.

use crate::error::{Error, Result};
use crate::opts::CopyOpts;
use crate::protocol::backend::{CommandComplete, CopyMode, CopyResponse};
use crate::transport::Transport;

use super::action::AsyncMessage;
use super::copy_both::CopyBothStateMachine;
use super::copy_in::{CopyInStateMachine, WriteStatus};
use super::copy_out::CopyOutStateMachine;

/// Capabilities a caller drives a COPY operation with.
pub trait CopyCodec {
    /// Feed raw inbound bytes while the operation owns the transport.
    fn accept_bytes<T: Transport + ?Sized>(&mut self, transport: &mut T, bytes: &[u8])
    -> Result<()>;

    /// Submit one chunk of outbound data.
    fn accept_write<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        chunk: Vec<u8>,
    ) -> Result<WriteStatus>;

    /// The caller has no more outbound data.
    fn finalize<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()>;

    /// The caller gives up on the operation.
    fn abort<T: Transport + ?Sized>(&mut self, transport: &mut T, message: &str);
}

impl CopyCodec for CopyOutStateMachine {
    fn accept_bytes<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        bytes: &[u8],
    ) -> Result<()> {
        CopyOutStateMachine::accept_bytes(self, transport, bytes)
    }

    fn accept_write<T: Transport + ?Sized>(
        &mut self,
        _transport: &mut T,
        _chunk: Vec<u8>,
    ) -> Result<WriteStatus> {
        Err(Error::InvalidUsage("COPY OUT does not accept writes".into()))
    }

    fn finalize<T: Transport + ?Sized>(&mut self, _transport: &mut T) -> Result<()> {
        Ok(())
    }

    fn abort<T: Transport + ?Sized>(&mut self, transport: &mut T, _message: &str) {
        self.discard(transport);
    }
}

impl CopyCodec for CopyInStateMachine {
    fn accept_bytes<T: Transport + ?Sized>(
        &mut self,
        _transport: &mut T,
        _bytes: &[u8],
    ) -> Result<()> {
        Err(Error::InvalidUsage(
            "COPY IN never takes over inbound bytes".into(),
        ))
    }

    fn accept_write<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        chunk: Vec<u8>,
    ) -> Result<WriteStatus> {
        self.write(transport, chunk)
    }

    fn finalize<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.finish(transport)
    }

    fn abort<T: Transport + ?Sized>(&mut self, transport: &mut T, message: &str) {
        CopyInStateMachine::abort(self, transport, message);
    }
}

impl CopyCodec for CopyBothStateMachine {
    fn accept_bytes<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        bytes: &[u8],
    ) -> Result<()> {
        CopyBothStateMachine::accept_bytes(self, transport, bytes)
    }

    fn accept_write<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        chunk: Vec<u8>,
    ) -> Result<WriteStatus> {
        self.write(transport, chunk)
    }

    fn finalize<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.finish(transport)
    }

    // The sub-protocol has no CopyFail for this direction; end our side instead.
    fn abort<T: Transport + ?Sized>(&mut self, transport: &mut T, _message: &str) {
        if let Err(error) = self.discard(transport) {
            tracing::warn!(%error, "failed to end COPY BOTH");
        }
    }
}

/// One COPY operation of any mode.
#[derive(Debug)]
pub enum CopyOperation {
    /// COPY ... TO STDOUT
    Out(CopyOutStateMachine),
    /// COPY ... FROM STDIN
    In(CopyInStateMachine),
    /// Replication stream
    Both(CopyBothStateMachine),
}

impl CopyOperation {
    /// Create an operation for `mode`.
    pub fn new(mode: CopyMode, opts: &CopyOpts) -> Self {
        match mode {
            CopyMode::Out => CopyOperation::Out(CopyOutStateMachine::new(opts)),
            CopyMode::In => CopyOperation::In(CopyInStateMachine::new(opts)),
            CopyMode::Both => CopyOperation::Both(CopyBothStateMachine::new(opts)),
        }
    }

    /// Mode of this operation.
    pub fn mode(&self) -> CopyMode {
        match self {
            CopyOperation::Out(_) => CopyMode::Out,
            CopyOperation::In(_) => CopyMode::In,
            CopyOperation::Both(_) => CopyMode::Both,
        }
    }

    /// Attach decoding operations to the transport.
    pub fn start<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        match self {
            CopyOperation::Out(op) => op.attach(transport),
            CopyOperation::In(_) => Ok(()),
            CopyOperation::Both(op) => op.attach(transport),
        }
    }

    /// True while inbound bytes must be routed to this operation.
    pub fn is_attached(&self) -> bool {
        match self {
            CopyOperation::Out(op) => op.is_attached(),
            CopyOperation::In(_) => false,
            CopyOperation::Both(op) => op.is_attached(),
        }
    }

    /// Next decoded chunk from the server.
    pub fn next_chunk<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Option<Vec<u8>> {
        match self {
            CopyOperation::Out(op) => op.next_chunk(transport),
            CopyOperation::In(_) => None,
            CopyOperation::Both(op) => op.next_chunk(transport),
        }
    }

    /// True once the server's data ended and every chunk was taken.
    pub fn is_data_ended(&self) -> bool {
        match self {
            CopyOperation::Out(op) => op.is_data_ended(),
            CopyOperation::In(_) => true,
            CopyOperation::Both(op) => op.is_data_ended(),
        }
    }

    /// Rows transferred so far, or the server's count once reported.
    pub fn row_count(&self) -> u64 {
        match self {
            CopyOperation::Out(op) => op.row_count(),
            CopyOperation::In(op) => op.row_count(),
            CopyOperation::Both(op) => op.row_count(),
        }
    }

    /// The copy response, once received.
    pub fn response(&self) -> Option<&CopyResponse> {
        match self {
            CopyOperation::Out(op) => op.response(),
            CopyOperation::In(op) => op.response(),
            CopyOperation::Both(op) => op.response(),
        }
    }

    /// Pass-through messages the operation consumed while attached.
    pub fn take_async_messages(&mut self) -> Vec<AsyncMessage> {
        match self {
            CopyOperation::Out(op) => op.take_async_messages(),
            CopyOperation::In(_) => Vec::new(),
            CopyOperation::Both(op) => op.take_async_messages(),
        }
    }

    /// A copy response reached the dispatcher. Returns `false` if this
    /// operation does not expect it there.
    pub fn handle_copy_response<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        mode: CopyMode,
        response: CopyResponse,
    ) -> bool {
        match self {
            CopyOperation::In(op) if mode == CopyMode::In => {
                op.handle_copy_in_response(transport, response);
                true
            }
            _ => false,
        }
    }

    /// Apply a CommandComplete tag.
    pub fn handle_command_complete(&mut self, complete: &CommandComplete<'_>) {
        match self {
            CopyOperation::Out(op) => op.handle_command_complete(complete),
            CopyOperation::In(op) => op.handle_command_complete(complete),
            CopyOperation::Both(op) => op.handle_command_complete(complete),
        }
    }

    /// Record an error reported by the server or found by the dispatcher.
    pub fn handle_error<T: Transport + ?Sized>(&mut self, transport: &mut T, error: Error) {
        match self {
            CopyOperation::Out(op) => op.handle_error(transport, error),
            CopyOperation::In(op) => op.handle_error(error),
            CopyOperation::Both(op) => op.handle_error(transport, error),
        }
    }

    /// ReadyForQuery ends the operation.
    pub fn handle_ready_for_query<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        match self {
            CopyOperation::Out(op) => op.handle_ready_for_query(transport),
            CopyOperation::In(op) => op.handle_ready_for_query(),
            CopyOperation::Both(op) => op.handle_ready_for_query(transport),
        }
    }

    /// The transport has room again.
    pub fn handle_drain<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        match self {
            CopyOperation::Out(_) => {}
            CopyOperation::In(op) => op.handle_drain(transport),
            CopyOperation::Both(op) => op.handle_drain(transport),
        }
    }

    /// The transport failed or closed.
    pub fn handle_transport_error<T: Transport + ?Sized>(&mut self, transport: &mut T, error: Error) {
        match self {
            CopyOperation::Out(op) => op.handle_transport_error(transport, error),
            CopyOperation::In(op) => op.handle_transport_error(error),
            CopyOperation::Both(op) => op.handle_transport_error(transport, error),
        }
    }

    /// True while progress depends on bytes from the server.
    pub fn is_awaiting_server(&self) -> bool {
        match self {
            CopyOperation::Out(op) => op.is_pending(),
            CopyOperation::In(op) => op.is_awaiting_server(),
            CopyOperation::Both(op) => op.is_awaiting_server(),
        }
    }

    /// True until the outcome is resolved.
    pub fn is_pending(&self) -> bool {
        match self {
            CopyOperation::Out(op) => op.is_pending(),
            CopyOperation::In(op) => op.is_pending(),
            CopyOperation::Both(op) => op.is_pending(),
        }
    }

    /// Take the resolved outcome.
    pub fn take_outcome(&mut self) -> Option<Result<u64>> {
        match self {
            CopyOperation::Out(op) => op.take_outcome(),
            CopyOperation::In(op) => op.take_outcome(),
            CopyOperation::Both(op) => op.take_outcome(),
        }
    }
}

impl CopyCodec for CopyOperation {
    fn accept_bytes<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        bytes: &[u8],
    ) -> Result<()> {
        match self {
            CopyOperation::Out(op) => CopyCodec::accept_bytes(op, transport, bytes),
            CopyOperation::In(op) => CopyCodec::accept_bytes(op, transport, bytes),
            CopyOperation::Both(op) => CopyCodec::accept_bytes(op, transport, bytes),
        }
    }

    fn accept_write<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        chunk: Vec<u8>,
    ) -> Result<WriteStatus> {
        match self {
            CopyOperation::Out(op) => op.accept_write(transport, chunk),
            CopyOperation::In(op) => op.accept_write(transport, chunk),
            CopyOperation::Both(op) => op.accept_write(transport, chunk),
        }
    }

    fn finalize<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        match self {
            CopyOperation::Out(op) => op.finalize(transport),
            CopyOperation::In(op) => op.finalize(transport),
            CopyOperation::Both(op) => op.finalize(transport),
        }
    }

    fn abort<T: Transport + ?Sized>(&mut self, transport: &mut T, message: &str) {
        match self {
            CopyOperation::Out(op) => CopyCodec::abort(op, transport, message),
            CopyOperation::In(op) => CopyCodec::abort(op, transport, message),
            CopyOperation::Both(op) => CopyCodec::abort(op, transport, message),
        }
    }
}
