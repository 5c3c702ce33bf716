//! Growable byte staging buffer.
//!
//! A [`ByteBuffer`] holds the bytes a peer has received but not yet handed
//! downstream. Reads land in a writable tail exposed by
//! [`ByteBuffer::get_buffer`] and become visible only after
//! [`ByteBuffer::append`] commits them, so an in-flight read can never
//! clobber staged data.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default size of the writable tail offered to a single read.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Append-only byte region with a front cursor.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    inner: BytesMut,
    /// Number of committed bytes at the front of `inner`
    valid: usize,
}

impl ByteBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
            valid: 0,
        }
    }

    /// Writable tail for the next read, at least `at_least` bytes long.
    ///
    /// The tail is not part of the readable view until [`append`](Self::append)
    /// commits some prefix of it.
    pub fn get_buffer(&mut self, at_least: usize) -> &mut [u8] {
        let room = at_least.max(1);
        self.inner.truncate(self.valid);
        self.inner.resize(self.valid + room, 0);
        &mut self.inner[self.valid..]
    }

    /// Read once from `reader` straight onto the tail, committing what
    /// arrives. `Ok(0)` means EOF.
    ///
    /// Reserves at least `at_least` bytes of spare capacity and reads into
    /// it without zero-filling, so a reused buffer costs no memset per read.
    pub async fn read_from<R>(&mut self, reader: &mut R, at_least: usize) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        self.inner.truncate(self.valid);
        self.inner.reserve(at_least.max(1));
        let n = reader.read_buf(&mut self.inner).await?;
        self.valid += n;
        Ok(n)
    }

    /// Commit `n` bytes written into the tail returned by the last
    /// [`get_buffer`](Self::get_buffer).
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the tail most recently exposed.
    pub fn append(&mut self, n: usize) {
        assert!(
            self.valid + n <= self.inner.len(),
            "append({}) exceeds exposed tail of {} bytes",
            n,
            self.inner.len() - self.valid
        );
        self.valid += n;
        self.inner.truncate(self.valid);
    }

    /// Readable view of all committed bytes.
    pub fn get_const_buffer(&self) -> &[u8] {
        &self.inner[..self.valid]
    }

    /// Discard every committed byte.
    pub fn reset(&mut self) {
        self.inner.clear();
        self.valid = 0;
    }

    /// Remove the first `n` committed bytes.
    pub fn dequeue(&mut self, n: usize) {
        let n = n.min(self.valid);
        self.inner.truncate(self.valid);
        self.inner.advance(n);
        self.valid -= n;
    }

    /// Copy `other`'s committed bytes onto this buffer's tail.
    pub fn append_data(&mut self, other: &ByteBuffer) {
        self.extend_from_slice(other.get_const_buffer());
    }

    /// Copy a slice onto the tail.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.inner.truncate(self.valid);
        self.inner.extend_from_slice(data);
        self.valid += data.len();
    }

    /// Move all committed bytes out, leaving the buffer empty.
    pub fn take(&mut self) -> BytesMut {
        self.inner.truncate(self.valid);
        self.valid = 0;
        self.inner.split()
    }

    /// Number of committed bytes.
    pub fn len(&self) -> usize {
        self.valid
    }

    /// Whether there are no committed bytes.
    pub fn is_empty(&self) -> bool {
        self.valid == 0
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        let mut buf = ByteBuffer::with_capacity(data.len());
        buf.extend_from_slice(data);
        buf
    }
}
