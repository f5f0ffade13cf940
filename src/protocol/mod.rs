//! PostgreSQL wire protocol implementation.
//!
//! This module contains the low-level protocol encoding and decoding used
//! while a connection is in (or entering) COPY mode.
//!
//! # Structure
//!
//! - `backend`: Server → Client messages (parsing)
//! - `frontend`: Client → Server messages (encoding)
//! - `frame`: The `[code][length][payload]` message header
//! - `codec`: Low-level encoding/decoding primitives
//! - `types`: Common protocol types (FormatCode, TransactionStatus)

pub mod backend;
pub mod codec;
pub mod frame;
pub mod frontend;
pub mod types;

// Re-export commonly used types
pub use backend::RawMessage;
pub use frame::{FrameHeader, HEADER_LEN, decode_header, encode_header};
pub use types::{FormatCode, TransactionStatus};
