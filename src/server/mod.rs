//! Listener and session supervision.
//!
//! ```text
//!  client ──► Server::run ──► RelaySession ──► target
//!               │                  │
//!               │                  ├─ HeaderNegotiator
//!               │                  ├─ Resolver / connect
//!               │                  └─ relay_direction × 2
//!               └─ ServerMetrics
//! ```
//!
//! The same listener serves both roles: in server mode the client leg is
//! encrypted, in local mode the client speaks SOCKS5 and the target is the
//! remote server.

pub mod config;
mod metrics;
pub mod plugin;
mod session;

pub use config::{Config, ConfigFile, Mode, PluginConfig};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use plugin::Plugin;
pub use session::{RelaySession, Role, SessionContext, SessionId, SessionOutcome, SessionState};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::Address;
use crate::proxy::{Resolver, SystemResolver};

/// Main server instance.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    metrics: Arc<ServerMetrics>,
    next_id: AtomicU64,
    no_delay: bool,
}

impl Server {
    /// Bind the listener described by `config`.
    pub async fn bind(config: Config) -> Result<Self> {
        Self::bind_with_resolver(config, Arc::new(SystemResolver)).await
    }

    /// Bind with a custom resolver.
    pub async fn bind_with_resolver(config: Config, resolver: Arc<dyn Resolver>) -> Result<Self> {
        let role = match config.mode {
            Mode::Server => Role::Server,
            Mode::Local => Role::Local {
                server: config
                    .server
                    .clone()
                    .ok_or_else(|| Error::config("local mode needs a server address"))?,
            },
        };

        let listener = match &config.bind {
            Address::Socket(addr) => TcpListener::bind(addr).await?,
            Address::Domain(host, port) => TcpListener::bind((host.as_str(), *port)).await?,
        };

        Ok(Self {
            listener,
            ctx: Arc::new(SessionContext {
                role,
                crypto: config.crypto,
                ttl: config.timeout,
                no_delay: config.no_delay,
                resolver,
            }),
            metrics: Arc::new(ServerMetrics::new()),
            next_id: AtomicU64::new(1),
            no_delay: config.no_delay,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Get server metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Accept connections until `shutdown` fires, then wait for every
    /// session to wind down.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let role = match &self.ctx.role {
            Role::Server => "server",
            Role::Local { .. } => "local",
        };
        tracing::info!(
            addr = %self.local_addr()?,
            role,
            method = %self.ctx.crypto.kind(),
            timeout = ?self.ctx.ttl,
            "listening"
        );

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        if self.no_delay {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!("set_nodelay failed for {}: {}", peer_addr, e);
                            }
                        }
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(session = id, peer = %peer_addr, "accepted");

                        let session = RelaySession::new(id, stream, Arc::clone(&self.ctx), &shutdown);
                        let metrics = Arc::clone(&self.metrics);
                        metrics.session_started();
                        sessions.spawn(async move {
                            let outcome = session.run().await;
                            metrics.session_finished(&outcome);
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Accept error: {}", e);
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("session task failed: {}", e);
                    }
                }
            }
        }

        tracing::info!(active = sessions.len(), "shutting down");
        while sessions.join_next().await.is_some() {}
        tracing::info!("\n{}", self.metrics.format_report());
        Ok(())
    }
}

/// Run a relay for `config` until `shutdown` fires, starting and supervising
/// its plugin if one is configured.
///
/// If the plugin exits on its own the relay is shut down and an error is
/// returned.
pub async fn run_with_shutdown(config: Config, shutdown: CancellationToken) -> Result<()> {
    match launch(config).await? {
        (server, None) => server.run(shutdown).await,
        (server, Some(mut plugin)) => supervise(server, &mut plugin, shutdown).await,
    }
}

/// Bind the relay and start its plugin, if any.
///
/// In server mode the plugin takes the configured public endpoint and the
/// relay binds an ephemeral loopback port behind it. In local mode the
/// plugin listens on a free loopback port and the relay dials it instead
/// of the remote server.
pub async fn launch(config: Config) -> Result<(Server, Option<Plugin>)> {
    let Some(plugin_config) = config.plugin.clone() else {
        return Ok((Server::bind(config).await?, None));
    };

    let mut config = config;
    match config.mode {
        Mode::Server => {
            let public = std::mem::replace(&mut config.bind, Address::Socket(([127, 0, 0, 1], 0).into()));
            let server = Server::bind(config).await?;
            let plugin = Plugin::start(&plugin_config, &public.host(), public.port(), server.local_addr()?)?;
            Ok((server, Some(plugin)))
        }
        Mode::Local => {
            let remote = config
                .server
                .clone()
                .ok_or_else(|| Error::config("local mode needs a server address"))?;
            let plugin_local = plugin::free_loopback_port().await?;
            let plugin = Plugin::start(&plugin_config, &remote.host(), remote.port(), plugin_local)?;
            config.server = Some(Address::Socket(plugin_local));
            Ok((Server::bind(config).await?, Some(plugin)))
        }
    }
}

/// Run `server` alongside `plugin`. The plugin is killed when the relay
/// stops; the relay is shut down when the plugin exits first.
pub async fn supervise(server: Server, plugin: &mut Plugin, shutdown: CancellationToken) -> Result<()> {
    let relay_shutdown = shutdown.child_token();
    let run = server.run(relay_shutdown.clone());
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => {
            plugin.kill().await;
            res
        }
        status = plugin.wait() => {
            tracing::error!("relay will terminate because the plugin exited: {:?}", status);
            relay_shutdown.cancel();
            run.await?;
            Err(Error::Plugin("plugin exited".into()))
        }
    }
}
