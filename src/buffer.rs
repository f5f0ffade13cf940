//! Reassembly buffer for inbound protocol bytes.

/// Ordered accumulator of bytes received but not yet consumed.
///
/// Consumed bytes are only skipped over by advancing a cursor. The dead
/// prefix is reclaimed on the next `extend` once it is at least as large as
/// the live bytes, so every byte is moved a bounded number of times no
/// matter how the input is chunked.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buf: Vec<u8>,
    start: usize,
}

impl ReadBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            start: 0,
        }
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    /// True if every received byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unconsumed bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.get(self.start..).unwrap_or_default()
    }

    /// First unconsumed byte.
    pub fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.start).copied()
    }

    /// Append newly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        if self.start > 0 && self.start >= self.len() {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Put bytes back in front of the unconsumed bytes.
    pub fn unshift(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(new_start) = self.start.checked_sub(data.len())
            && let Some(slot) = self.buf.get_mut(new_start..self.start)
        {
            slot.copy_from_slice(data);
            self.start = new_start;
            return;
        }
        let mut buf = Vec::with_capacity(data.len() + self.len());
        buf.extend_from_slice(data);
        buf.extend_from_slice(self.as_slice());
        self.buf = buf;
        self.start = 0;
    }

    /// Consume up to `n` bytes and return them.
    pub fn take(&mut self, n: usize) -> &[u8] {
        let n = n.min(self.len());
        let from = self.start;
        self.start += n;
        self.buf.get(from..self.start).unwrap_or_default()
    }

    /// Consume exactly `N` bytes into an array, or nothing if fewer are buffered.
    pub fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes: [u8; N] = self.as_slice().get(..N)?.try_into().ok()?;
        self.start += N;
        Some(bytes)
    }

    /// Consume and return every buffered byte.
    pub fn take_all(&mut self) -> Vec<u8> {
        let out = self.as_slice().to_vec();
        self.clear();
        out
    }

    /// Drop every buffered byte.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
    }
}
