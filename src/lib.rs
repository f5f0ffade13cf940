//! Streaming codecs for the PostgreSQL COPY sub-protocol.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: COPY framing and backpressure are separated from I/O
//! - **Streaming**: COPY data is delivered in chunks as it arrives, not row by row
//! - **Transport handoff**: a COPY borrows the connection's inbound stream and hands
//!   unconsumed bytes back when it ends
//! - **Sync and async APIs**: Choose between synchronous and tokio-based async
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpStream;
//!
//! use zero_pg_copy::sync::Conn;
//!
//! fn main() -> zero_pg_copy::Result<()> {
//!     // An already authenticated stream.
//!     let stream = TcpStream::connect("localhost:5432")?;
//!     let mut conn = Conn::new(stream);
//!
//!     let mut copy = conn.copy_in("COPY items FROM STDIN")?;
//!     copy.write(b"1\tapple\n")?;
//!     copy.write(b"2\tbanana\n")?;
//!     let rows = copy.finish()?;
//!     println!("copied {rows} rows");
//!
//!     let (data, _) = conn.copy_out("COPY items TO STDOUT")?.read_to_end()?;
//!     println!("{}", String::from_utf8_lossy(&data));
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod error;
pub mod handler;
pub mod opts;
pub mod protocol;
pub mod state;
pub mod transport;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use error::{Error, ErrorFields, Result};
pub use handler::{AsyncMessageHandler, LogHandler};
pub use opts::CopyOpts;
pub use protocol::backend::{CopyMode, CopyResponse};
pub use protocol::types::{FormatCode, TransactionStatus};
pub use state::{Action, AsyncMessage, Session, WriteStatus};
