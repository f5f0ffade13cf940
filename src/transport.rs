//! Handoff of the connection's inbound byte path between the host
//! dispatcher and a COPY operation.
//!
//! The host connection normally parses every inbound message itself. While
//! a copy-out or copy-both operation is attached, raw inbound bytes go to the
//! operation instead. When the operation is done with them it releases its
//! [`Attachment`], handing back whatever bytes belong to the next protocol
//! message so the dispatcher resumes exactly where the operation stopped.

use crate::error::{Error, Result};

/// Current consumer of inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// The host connection's own message dispatcher.
    Dispatcher,
    /// An attached COPY operation.
    Copy,
}

/// Byte-level connection transport shared by the dispatcher and COPY operations.
pub trait Transport {
    /// Who receives inbound bytes right now.
    fn receiver(&self) -> Receiver;

    /// Route inbound bytes to `receiver`.
    fn set_receiver(&mut self, receiver: Receiver);

    /// True while inbound delivery is suspended.
    fn is_paused(&self) -> bool;

    /// Stop reading from the peer.
    fn pause(&mut self);

    /// Resume reading from the peer.
    fn resume(&mut self);

    /// Queue bytes for the peer.
    ///
    /// The bytes are always accepted. Returns `false` once the transport is
    /// saturated; the host reports a drain when it has room again.
    fn write(&mut self, data: &[u8]) -> bool;

    /// Put unconsumed bytes back at the front of the inbound path.
    fn unshift(&mut self, data: &[u8]);
}

/// Exclusive, revocable ownership of a transport's inbound bytes.
///
/// Released by value, so one attachment can never restore the transport twice.
#[derive(Debug)]
#[must_use = "an attachment must be released to hand the transport back"]
pub struct Attachment {
    previous: Receiver,
}

impl Attachment {
    /// Take over inbound delivery, resuming the transport if it was paused.
    ///
    /// Fails if another COPY operation is still attached.
    pub fn acquire<T: Transport + ?Sized>(transport: &mut T) -> Result<Self> {
        let previous = transport.receiver();
        if previous == Receiver::Copy {
            return Err(Error::InvalidUsage(
                "transport is already attached to a COPY operation".into(),
            ));
        }
        transport.set_receiver(Receiver::Copy);
        if transport.is_paused() {
            transport.resume();
        }
        tracing::trace!("COPY operation attached to transport");
        Ok(Self { previous })
    }

    /// Hand inbound delivery back, restoring `unconsumed` before resuming.
    pub fn release<T: Transport + ?Sized>(self, transport: &mut T, unconsumed: &[u8]) {
        transport.set_receiver(self.previous);
        transport.unshift(unconsumed);
        transport.resume();
        tracing::trace!(
            restored = unconsumed.len(),
            "COPY operation detached from transport"
        );
    }
}

/// Release `attachment` if it is still held. Repeated calls are no-ops.
pub(crate) fn detach<T: Transport + ?Sized>(
    attachment: &mut Option<Attachment>,
    transport: &mut T,
    unconsumed: &[u8],
) {
    if let Some(attachment) = attachment.take() {
        attachment.release(transport, unconsumed);
    }
}

/// In-memory transport for exercising state machines without a connection.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct MockTransport {
    pub receiver: Receiver,
    pub paused: bool,
    pub written: Vec<u8>,
    pub restored: Vec<u8>,
    /// `write` reports saturation once `written` reaches this size.
    pub capacity: usize,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            receiver: Receiver::Dispatcher,
            paused: false,
            written: Vec::new(),
            restored: Vec::new(),
            capacity: usize::MAX,
        }
    }
}

#[cfg(test)]
impl Transport for MockTransport {
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
        self.written.extend_from_slice(data);
        self.written.len() < self.capacity
    }

    fn unshift(&mut self, data: &[u8]) {
        let mut restored = data.to_vec();
        restored.extend_from_slice(&self.restored);
        self.restored = restored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_resumes_paused_transport() {
        let mut transport = MockTransport::new();
        transport.paused = true;
        let attachment = Attachment::acquire(&mut transport).unwrap();
        assert_eq!(transport.receiver, Receiver::Copy);
        assert!(!transport.paused);
        attachment.release(&mut transport, b"Z");
        assert_eq!(transport.receiver, Receiver::Dispatcher);
        assert_eq!(transport.restored, b"Z");
    }

    #[test]
    fn second_attachment_is_refused() {
        let mut transport = MockTransport::new();
        let first = Attachment::acquire(&mut transport).unwrap();
        assert!(Attachment::acquire(&mut transport).is_err());
        first.release(&mut transport, &[]);
        assert!(Attachment::acquire(&mut transport).is_ok());
    }

    #[test]
    fn detach_is_idempotent() {
        let mut transport = MockTransport::new();
        let mut slot = Some(Attachment::acquire(&mut transport).unwrap());
        detach(&mut slot, &mut transport, b"C");
        transport.receiver = Receiver::Copy;
        detach(&mut slot, &mut transport, b"C");
        assert_eq!(transport.receiver, Receiver::Copy);
        assert_eq!(transport.restored, b"C");
    }
}
