//! Handlers for asynchronous server messages.

use crate::state::action::AsyncMessage;

/// Receives notices, notifications, and parameter changes.
///
/// Messages seen while a COPY stream is attached are delivered too; they
/// never interrupt the data stream.
pub trait AsyncMessageHandler: Send {
    /// Called once per message, in arrival order.
    fn handle(&mut self, message: &AsyncMessage);
}

impl<F> AsyncMessageHandler for F
where
    F: FnMut(&AsyncMessage) + Send,
{
    fn handle(&mut self, message: &AsyncMessage) {
        self(message)
    }
}

/// A handler that logs every message through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl AsyncMessageHandler for LogHandler {
    fn handle(&mut self, message: &AsyncMessage) {
        match message {
            AsyncMessage::Notice(fields) => tracing::info!(notice = %fields, "server notice"),
            AsyncMessage::Notification {
                pid,
                channel,
                payload,
            } => tracing::info!(pid, channel, payload, "notification"),
            AsyncMessage::ParameterChanged { name, value } => {
                tracing::debug!(name, value, "server parameter changed")
            }
        }
    }
}
