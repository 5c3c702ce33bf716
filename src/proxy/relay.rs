//! Bidirectional relay and session teardown.
//!
//! Each direction reads from its source peer, runs the bytes through the
//! direction's [`ProtocolHook`] and writes the output to the destination
//! peer. Whichever direction finishes or fails first triggers the
//! session's [`Teardown`]; the other direction then observes
//! [`Error::Canceled`] and stops without logging.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::{HookOutcome, ProtocolHook};
use crate::proxy::peer::{PeerControl, PeerReader, PeerWriter};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// A leg reached end-of-stream
    Finished,
    /// A peer saw no activity within its TTL
    IdleTimeout,
    /// The server is shutting down
    Shutdown,
    /// The remote sent bytes that violate the protocol
    ProtocolError(String),
    /// Resolution, connect or transport failure
    Failed(String),
}

impl CloseReason {
    /// Map a session error to a close reason. `Canceled` has none.
    pub fn from_error(err: &Error) -> Option<Self> {
        match err {
            Error::Canceled => None,
            Error::IdleTimeout => Some(CloseReason::IdleTimeout),
            Error::Network(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Some(CloseReason::Finished),
            e if e.is_protocol_violation() => Some(CloseReason::ProtocolError(e.to_string())),
            e => Some(CloseReason::Failed(e.to_string())),
        }
    }

    /// Whether this reason ends the session abnormally.
    pub fn is_abort(&self) -> bool {
        !matches!(self, CloseReason::Finished | CloseReason::Shutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Finished => f.write_str("finished"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
            CloseReason::Shutdown => f.write_str("shutdown"),
            CloseReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            CloseReason::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Consume-once teardown for one session.
///
/// The first [`trigger`](Self::trigger) records the reason, logs it and
/// cancels every peer derived from this teardown. Later triggers are
/// no-ops.
#[derive(Debug)]
pub struct Teardown {
    session_id: u64,
    token: CancellationToken,
    reason: Mutex<Option<CloseReason>>,
}

impl Teardown {
    /// Create a teardown cancelled along with `parent`.
    pub fn new(session_id: u64, parent: &CancellationToken) -> Self {
        Self {
            session_id,
            token: parent.child_token(),
            reason: Mutex::new(None),
        }
    }

    /// Create a peer control that is cancelled by this teardown.
    pub fn peer(&self, name: &'static str, ttl: Duration) -> Arc<PeerControl> {
        PeerControl::new(name, ttl, self.token.child_token())
    }

    /// Session-wide cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether teardown has started, by trigger or by parent cancellation.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Tear the session down. Returns `true` only for the first call.
    pub fn trigger(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() {
                tracing::trace!(session = self.session_id, %reason, "teardown already underway");
                return false;
            }
            match &reason {
                CloseReason::Finished | CloseReason::Shutdown => {
                    tracing::debug!(session = self.session_id, %reason, "session closing")
                }
                CloseReason::IdleTimeout => {
                    tracing::info!(session = self.session_id, "session idle, closing")
                }
                CloseReason::ProtocolError(_) | CloseReason::Failed(_) => {
                    tracing::warn!(session = self.session_id, %reason, "session aborted")
                }
            }
            *slot = Some(reason);
        }
        self.token.cancel();
        true
    }

    /// Tear down on `err`, ignoring cancellations.
    pub fn fail(&self, err: &Error) -> bool {
        match CloseReason::from_error(err) {
            Some(reason) => self.trigger(reason),
            None => {
                tracing::trace!(session = self.session_id, "operation canceled");
                false
            }
        }
    }

    /// Recorded reason, if a trigger happened.
    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.lock().clone()
    }
}

/// Relay one direction until end-of-stream or error.
///
/// Returns the number of bytes written to `dst`. End-of-stream triggers a
/// normal close of the whole session; any other failure tears it down with
/// the matching reason.
pub async fn relay_direction<R, W>(
    label: &'static str,
    hook: &mut ProtocolHook,
    src: &mut PeerReader<R>,
    dst: &mut PeerWriter<W>,
    teardown: &Teardown,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut transferred = 0u64;
    match pump(hook, src, dst, &mut transferred).await {
        Ok(()) => {
            tracing::trace!(direction = label, transferred, "end of stream");
            teardown.trigger(CloseReason::Finished);
        }
        Err(e) => {
            tracing::trace!(direction = label, transferred, error = %e, "direction stopped");
            teardown.fail(&e);
        }
    }
    transferred
}

async fn pump<R, W>(
    hook: &mut ProtocolHook,
    src: &mut PeerReader<R>,
    dst: &mut PeerWriter<W>,
    transferred: &mut u64,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match hook.process(src.buffer_mut())? {
            HookOutcome::NeedMore => {
                if src.read_some().await? == 0 {
                    return Ok(());
                }
            }
            HookOutcome::Ready(n) => {
                let buf = src.buffer_mut();
                dst.write_all(&buf.get_const_buffer()[..n]).await?;
                buf.reset();
                *transferred += n as u64;
            }
        }
    }
}
