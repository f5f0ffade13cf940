use std::io::{ErrorKind, Read, Write};

/// Blocking byte stream of an authenticated connection.
pub struct Stream<S> {
    inner: S,
    read_buf: Vec<u8>,
}

impl<S: Read + Write> Stream<S> {
    pub fn new(inner: S, read_chunk_size: usize) -> Self {
        Self {
            inner,
            read_buf: vec![0; read_chunk_size.max(1)],
        }
    }

    /// Read whatever is available, up to the chunk size. Empty means EOF.
    pub fn read_chunk(&mut self) -> std::io::Result<&[u8]> {
        loop {
            match self.inner.read(&mut self.read_buf) {
                Ok(n) => return Ok(self.read_buf.get(..n).unwrap_or_default()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(buf)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}
