//! One side of a relay session.
//!
//! A [`Peer`] bundles a stream, its staging [`ByteBuffer`] and a
//! [`PeerControl`] holding the idle TTL and the cancellation token. Every
//! I/O operation goes through [`PeerControl::run`], which arms a fresh
//! `now + ttl` deadline for that operation and races it against
//! cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::buffer::{ByteBuffer, READ_CHUNK_SIZE};
use crate::error::{Error, Result};

/// Idle timer and cancellation state shared by a peer and its halves.
#[derive(Debug)]
pub struct PeerControl {
    name: &'static str,
    ttl: Duration,
    token: CancellationToken,
}

impl PeerControl {
    /// Create a control whose cancellation follows `token`.
    pub fn new(name: &'static str, ttl: Duration, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self { name, ttl, token })
    }

    /// Peer name for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Idle TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cancel every in-flight and future operation on this peer.
    ///
    /// Idempotent.
    pub fn cancel_all(&self) {
        self.token.cancel();
    }

    /// Whether the peer has been canceled, directly or via its session.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run one operation under a freshly armed idle deadline.
    ///
    /// Returns [`Error::Canceled`] if the peer is or becomes closed, and
    /// [`Error::IdleTimeout`] if the deadline passes first. A deadline that
    /// expires after the peer was closed reports `Canceled`.
    ///
    /// The deadline covers this one operation only. Traffic in the other
    /// direction does not extend it, so a leg that stays silent for a full
    /// TTL ends the session even while the opposite leg keeps streaming.
    /// Long one-way transfers need a TTL above the longest expected
    /// silence on the quiet leg.
    pub async fn run<F, T, E>(&self, op: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        if self.is_closed() {
            return Err(Error::Canceled);
        }
        let deadline = Instant::now() + self.ttl;

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Canceled),
            res = tokio::time::timeout_at(deadline, op) => match res {
                Ok(r) => r.map_err(Into::into),
                Err(_) if self.is_closed() => Err(Error::Canceled),
                Err(_) => {
                    tracing::debug!(peer = self.name, ttl = ?self.ttl, "idle deadline expired");
                    Err(Error::IdleTimeout)
                }
            },
        }
    }
}

/// A stream with its staging buffer and idle control.
pub struct Peer<S> {
    stream: S,
    buf: ByteBuffer,
    control: Arc<PeerControl>,
}

impl<S> Peer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream.
    pub fn new(stream: S, control: Arc<PeerControl>) -> Self {
        Self {
            stream,
            buf: ByteBuffer::with_capacity(READ_CHUNK_SIZE),
            control,
        }
    }

    /// Shared control handle.
    pub fn control(&self) -> &Arc<PeerControl> {
        &self.control
    }

    /// Staged bytes.
    pub fn buffer(&self) -> &ByteBuffer {
        &self.buf
    }

    /// Staged bytes, mutably.
    pub fn buffer_mut(&mut self) -> &mut ByteBuffer {
        &mut self.buf
    }

    /// Read whatever is available onto the buffer tail. `Ok(0)` means EOF.
    pub async fn read_some(&mut self) -> Result<usize> {
        read_into(&mut self.stream, &mut self.buf, &self.control, 1).await
    }

    /// Read until at least `at_least` new bytes are staged or EOF.
    ///
    /// Returns the number of bytes staged by this call.
    pub async fn read_at_least(&mut self, at_least: usize) -> Result<usize> {
        let mut total = 0;
        while total < at_least {
            let n = read_into(&mut self.stream, &mut self.buf, &self.control, at_least - total).await?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Write all of `data`.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = &mut self.stream;
        self.control.run(stream.write_all(data)).await
    }

    /// Split into independently driven read and write halves.
    ///
    /// Staged bytes move to the read half.
    pub fn split(self) -> (PeerReader<ReadHalf<S>>, PeerWriter<WriteHalf<S>>) {
        let (reader, writer) = tokio::io::split(self.stream);
        (
            PeerReader {
                reader,
                buf: self.buf,
                control: Arc::clone(&self.control),
            },
            PeerWriter {
                writer,
                control: self.control,
            },
        )
    }
}

/// Receiving half of a peer.
pub struct PeerReader<R> {
    reader: R,
    buf: ByteBuffer,
    control: Arc<PeerControl>,
}

impl<R: AsyncRead + Unpin> PeerReader<R> {
    /// Read whatever is available onto the buffer tail. `Ok(0)` means EOF.
    pub async fn read_some(&mut self) -> Result<usize> {
        read_into(&mut self.reader, &mut self.buf, &self.control, 1).await
    }

    /// Staged bytes, mutably.
    pub fn buffer_mut(&mut self) -> &mut ByteBuffer {
        &mut self.buf
    }

    /// Shared control handle.
    pub fn control(&self) -> &Arc<PeerControl> {
        &self.control
    }
}

/// Sending half of a peer.
pub struct PeerWriter<W> {
    writer: W,
    control: Arc<PeerControl>,
}

impl<W: AsyncWrite + Unpin> PeerWriter<W> {
    /// Write all of `data`.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let writer = &mut self.writer;
        self.control.run(writer.write_all(data)).await
    }

    /// Shut down the write side.
    pub async fn shutdown(&mut self) -> Result<()> {
        let writer = &mut self.writer;
        self.control.run(writer.shutdown()).await
    }

    /// Shared control handle.
    pub fn control(&self) -> &Arc<PeerControl> {
        &self.control
    }
}

async fn read_into<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut ByteBuffer,
    control: &PeerControl,
    at_least: usize,
) -> Result<usize> {
    control.run(buf.read_from(reader, at_least.max(READ_CHUNK_SIZE))).await
}
