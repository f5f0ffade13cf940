//! Synchronous COPY client over a blocking stream.

mod conn;
mod copy;
mod stream;

pub use conn::Conn;
pub use copy::{CopyBoth, CopyIn, CopyOut};
