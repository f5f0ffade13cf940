//! PostgreSQL frontend (client → server) messages.

pub mod copy;
pub mod simple;

pub use copy::{copy_data_header, write_copy_done, write_copy_fail};
pub use simple::{write_query, write_terminate};

/// Frontend message type bytes.
pub mod msg_type {
    /// Query (simple query protocol)
    pub const QUERY: u8 = b'Q';
    /// CopyData
    pub const COPY_DATA: u8 = b'd';
    /// CopyDone
    pub const COPY_DONE: u8 = b'c';
    /// CopyFail
    pub const COPY_FAIL: u8 = b'f';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}
