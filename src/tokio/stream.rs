//! Async stream abstraction for tokio.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Async byte stream of an authenticated connection.
pub struct Stream<S> {
    inner: S,
    read_buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Stream<S> {
    pub fn new(inner: S, read_chunk_size: usize) -> Self {
        Self {
            inner,
            read_buf: vec![0; read_chunk_size.max(1)],
        }
    }

    /// Read whatever is available, up to the chunk size. Empty means EOF.
    pub async fn read_chunk(&mut self) -> std::io::Result<&[u8]> {
        let n = self.inner.read(&mut self.read_buf).await?;
        Ok(self.read_buf.get(..n).unwrap_or_default())
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(buf).await
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush().await
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}
