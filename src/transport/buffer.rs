use bytes::BytesMut;

/// Capacity kept around after a compaction; anything larger is released.
const RETAINED_CAPACITY: usize = 64 * 1024;

/// Outbound bytes that the socket has not accepted yet.
///
/// Data is appended at the tail and flushed from `written`. Once everything
/// has been flushed, [`compact`](Self::compact) rewinds both to zero so the
/// allocation can be reused.
///
/// Only the writer context touches this buffer, so it carries no lock.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    buffer: BytesMut,
    written: usize,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `bytes` behind everything not yet flushed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes still waiting to be written.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == self.buffer.len()
    }

    /// Returns up to `n` unflushed bytes starting at the cursor.
    pub fn drain(&self, n: usize) -> &[u8] {
        let end = self.buffer.len().min(self.written.saturating_add(n));
        &self.buffer[self.written..end]
    }

    /// Marks `n` bytes from the last [`drain`](Self::drain) as accepted by
    /// the socket. Never moves the cursor past the end of the data.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining(), "advanced past buffered data");
        self.written = self.buffer.len().min(self.written + n);
    }

    /// Rewinds an exhausted buffer. Does nothing while bytes are pending.
    pub fn compact(&mut self) {
        if !self.is_empty() {
            return;
        }
        if self.buffer.capacity() > RETAINED_CAPACITY {
            self.buffer = BytesMut::new();
        } else {
            self.buffer.clear();
        }
        self.written = 0;
    }

    /// Drops all pending bytes. Used when the stream is no longer usable.
    pub fn reset(&mut self) {
        self.written = self.buffer.len();
        self.compact();
    }
}
