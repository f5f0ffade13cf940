//! Asynchronous COPY client using Tokio.

mod conn;
mod copy;
mod stream;

pub use conn::Conn;
pub use copy::{CopyBoth, CopyIn, CopyOut};
