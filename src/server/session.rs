//! Per-connection relay session.
//!
//! A session walks `Negotiating → Resolving → Connecting → Relaying` and
//! ends `Closed` or `Aborted`. Every failure funnels into the session's
//! [`Teardown`], so whichever path fails first decides the reason and the
//! rest observe cancellation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::crypto::CryptoContext;
use crate::error::{Error, Result};
use crate::protocol::{Address, ProtocolHook};
use crate::proxy::{
    relay_direction, resolve_address, socks5, CloseReason, HeaderNegotiator, Peer, PeerControl, Resolver,
    Teardown,
};

/// Unique session identifier.
pub type SessionId = u64;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Reading the address header
    Negotiating,
    /// Resolving the target name
    Resolving,
    /// Trying target candidates
    Connecting,
    /// Shuttling bytes both ways
    Relaying,
    /// Ended normally
    Closed,
    /// Ended on error or idle timeout
    Aborted,
}

/// Which end of the tunnel a session serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Encrypted client leg, plain target leg
    Server,
    /// SOCKS5 client leg, encrypted leg to `server`
    Local {
        /// Remote relay server
        server: Address,
    },
}

/// Everything sessions of one listener share.
pub struct SessionContext {
    /// Role of every session
    pub role: Role,
    /// Cipher method and master key
    pub crypto: CryptoContext,
    /// Idle TTL per peer
    pub ttl: Duration,
    /// Set `TCP_NODELAY` on target sockets
    pub no_delay: bool,
    /// Name resolver
    pub resolver: Arc<dyn Resolver>,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Session id
    pub id: SessionId,
    /// `Closed` or `Aborted`
    pub state: SessionState,
    /// Why it ended
    pub reason: CloseReason,
    /// Negotiated target, if negotiation got that far
    pub target: Option<Address>,
    /// Bytes written towards the target
    pub client_to_target: u64,
    /// Bytes written towards the client
    pub target_to_client: u64,
}

struct Established {
    target: Peer<TcpStream>,
    upstream: ProtocolHook,
    downstream: ProtocolHook,
    /// Payload already delivered to the target during setup
    preflushed: u64,
}

/// One accepted connection and everything it owns.
pub struct RelaySession<S> {
    id: SessionId,
    ctx: Arc<SessionContext>,
    client: Peer<S>,
    target_control: Arc<PeerControl>,
    teardown: Arc<Teardown>,
    state: SessionState,
    target: Option<Address>,
}

impl<S> RelaySession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an accepted client stream. The session is cancelled when
    /// `shutdown` is.
    pub fn new(id: SessionId, stream: S, ctx: Arc<SessionContext>, shutdown: &CancellationToken) -> Self {
        let teardown = Arc::new(Teardown::new(id, shutdown));
        let client = Peer::new(stream, teardown.peer("client", ctx.ttl));
        let target_control = teardown.peer("target", ctx.ttl);
        Self {
            id,
            ctx,
            client,
            target_control,
            teardown,
            state: SessionState::Negotiating,
            target: None,
        }
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle on the session's teardown, usable after `run` consumed it.
    pub fn teardown(&self) -> Arc<Teardown> {
        Arc::clone(&self.teardown)
    }

    /// Drive the session to completion.
    pub async fn run(mut self) -> SessionOutcome {
        match self.establish().await {
            Ok(established) => self.relay(established).await,
            Err(e) => {
                self.teardown.fail(&e);
                finish(self.id, &self.teardown, self.target.take(), 0, 0)
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        tracing::trace!(session = self.id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    async fn establish(&mut self) -> Result<Established> {
        match self.ctx.role.clone() {
            Role::Server => self.establish_server().await,
            Role::Local { server } => self.establish_local(&server).await,
        }
    }

    async fn establish_server(&mut self) -> Result<Established> {
        self.set_state(SessionState::Negotiating);
        let mut upstream = ProtocolHook::decryptor(&self.ctx.crypto);
        let negotiated = HeaderNegotiator::new()
            .negotiate(&mut upstream, &mut self.client)
            .await?;
        tracing::debug!(session = self.id, target = %negotiated.address, "header negotiated");
        self.target = Some(negotiated.address.clone());

        let mut target = self.open_target(&negotiated.address).await?;
        if !negotiated.surplus.is_empty() {
            target.write_all(&negotiated.surplus).await?;
        }

        Ok(Established {
            target,
            upstream,
            downstream: ProtocolHook::encryptor(&self.ctx.crypto)?,
            preflushed: negotiated.surplus.len() as u64,
        })
    }

    async fn establish_local(&mut self, server: &Address) -> Result<Established> {
        self.set_state(SessionState::Negotiating);
        socks5::accept_request(&mut self.client).await?;
        let negotiated = HeaderNegotiator::new()
            .negotiate(&mut ProtocolHook::Plain, &mut self.client)
            .await?;
        tracing::debug!(session = self.id, target = %negotiated.address, "socks5 request");
        self.target = Some(negotiated.address.clone());
        socks5::send_success(&mut self.client).await?;

        let target = self.open_target(server).await?;

        // The header leads the encrypted stream, followed by any early payload
        let staged = self.client.buffer_mut();
        staged.extend_from_slice(&negotiated.header);
        staged.extend_from_slice(&negotiated.surplus);

        Ok(Established {
            target,
            upstream: ProtocolHook::encryptor(&self.ctx.crypto)?,
            downstream: ProtocolHook::decryptor(&self.ctx.crypto),
            preflushed: 0,
        })
    }

    async fn open_target(&mut self, address: &Address) -> Result<Peer<TcpStream>> {
        self.set_state(SessionState::Resolving);
        let candidates = self
            .target_control
            .run(resolve_address(self.ctx.resolver.as_ref(), address))
            .await?;

        self.set_state(SessionState::Connecting);
        let stream = self.connect_any(&candidates).await?;
        if self.ctx.no_delay {
            stream.set_nodelay(true)?;
        }
        Ok(Peer::new(stream, Arc::clone(&self.target_control)))
    }

    /// Try candidates in order; first success wins. No attempt starts once
    /// teardown has begun.
    async fn connect_any(&self, candidates: &[SocketAddr]) -> Result<TcpStream> {
        let mut last_error = None;
        for addr in candidates {
            if self.teardown.is_triggered() {
                return Err(Error::Canceled);
            }
            match self.target_control.run(TcpStream::connect(addr)).await {
                Ok(stream) => {
                    tracing::debug!(session = self.id, %addr, "connected");
                    return Ok(stream);
                }
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(e) => {
                    tracing::debug!(session = self.id, %addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Resolve("no candidates".into())))
    }

    async fn relay(mut self, established: Established) -> SessionOutcome {
        self.set_state(SessionState::Relaying);
        let Established {
            target,
            mut upstream,
            mut downstream,
            preflushed,
        } = established;

        let (mut client_rx, mut client_tx) = self.client.split();
        let (mut target_rx, mut target_tx) = target.split();
        let teardown = self.teardown.as_ref();

        let (up, down) = tokio::join!(
            relay_direction("client->target", &mut upstream, &mut client_rx, &mut target_tx, teardown),
            relay_direction("target->client", &mut downstream, &mut target_rx, &mut client_tx, teardown),
        );

        finish(self.id, &self.teardown, self.target.take(), up + preflushed, down)
    }
}

fn finish(
    id: SessionId,
    teardown: &Teardown,
    target: Option<Address>,
    client_to_target: u64,
    target_to_client: u64,
) -> SessionOutcome {
    // Without a recorded reason the parent token fired: server shutdown
    let reason = teardown.reason().unwrap_or(CloseReason::Shutdown);
    teardown.token().cancel();
    let state = if reason.is_abort() {
        SessionState::Aborted
    } else {
        SessionState::Closed
    };
    tracing::debug!(
        session = id,
        ?state,
        %reason,
        client_to_target,
        target_to_client,
        "session ended"
    );
    SessionOutcome {
        id,
        state,
        reason,
        target,
        client_to_target,
        target_to_client,
    }
}
