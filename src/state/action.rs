//! Action types for state machine I/O requests.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::backend::{
    NoticeResponse, NotificationResponse, ParameterStatus, RawMessage, msg_type,
};

/// Action requested by the session.
///
/// The caller should perform the requested I/O and then report back to the
/// session before asking for the next action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Write `Session::write_buffer()` to the server, flush, then call
    /// `Session::flushed()`.
    Write,

    /// Read bytes from the server and hand them to `Session::receive()`.
    ///
    /// A read of zero bytes must be reported through `Session::connection_lost()`.
    Read,

    /// Nothing to do until the caller reads output, writes data, or finishes.
    Yield,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time, including between CopyData messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Non-fatal notice/warning from server.
    Notice(ErrorFields),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

impl AsyncMessage {
    /// Parse one of the pass-through message types.
    pub fn parse(msg: &RawMessage<'_>) -> Result<Self> {
        match msg.type_byte {
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(msg.payload)?;
                Ok(AsyncMessage::Notice(notice.fields))
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(msg.payload)?;
                Ok(AsyncMessage::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                })
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification = NotificationResponse::parse(msg.payload)?;
                Ok(AsyncMessage::Notification {
                    pid: notification.pid,
                    channel: notification.channel.to_string(),
                    payload: notification.payload.to_string(),
                })
            }
            _ => Err(Error::Protocol(format!(
                "Unknown async message type: '{}'",
                msg.type_byte as char
            ))),
        }
    }
}
