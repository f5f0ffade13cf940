//! PostgreSQL backend (server → client) messages.

pub mod copy;
pub mod error;
pub mod query;
pub mod status;

pub use copy::{CopyMode, CopyResponse};
pub use error::{ErrorResponse, NoticeResponse};
pub use query::CommandComplete;
pub use status::{NotificationResponse, ParameterStatus, ReadyForQuery};

/// Backend message type bytes.
pub mod msg_type {
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// CopyInResponse
    pub const COPY_IN_RESPONSE: u8 = b'G';
    /// CopyOutResponse
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    /// CopyBothResponse
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
    /// CopyData
    pub const COPY_DATA: u8 = b'd';
    /// CopyDone
    pub const COPY_DONE: u8 = b'c';
}

/// One complete server message: type byte and payload borrowed from the
/// reassembly buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    /// Message type byte
    pub type_byte: u8,
    /// Message payload (after length field)
    pub payload: &'a [u8],
}

impl<'a> RawMessage<'a> {
    /// Create a new RawMessage.
    pub fn new(type_byte: u8, payload: &'a [u8]) -> Self {
        Self { type_byte, payload }
    }

    /// Notices, notifications and parameter changes. They may arrive between
    /// CopyData messages and never end COPY mode.
    pub fn is_async_type(type_byte: u8) -> bool {
        matches!(
            type_byte,
            msg_type::NOTICE_RESPONSE
                | msg_type::NOTIFICATION_RESPONSE
                | msg_type::PARAMETER_STATUS
        )
    }
}
