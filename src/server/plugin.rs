//! SIP003 plugin process.
//!
//! The plugin sits between the relay and the network. It learns both
//! endpoints from environment variables and runs until it exits or is
//! killed.

use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};

use tokio::net::TcpListener;
use tokio::process::{Child, Command};

use crate::error::{Error, Result};
use crate::server::config::PluginConfig;

/// A running plugin.
#[derive(Debug)]
pub struct Plugin {
    name: String,
    child: Child,
}

impl Plugin {
    /// Spawn `config.command` with the SIP003 environment.
    ///
    /// `remote` is where the plugin connects or listens on the network side;
    /// `local` is the relay-facing loopback endpoint.
    pub fn start(config: &PluginConfig, remote_host: &str, remote_port: u16, local: SocketAddr) -> Result<Self> {
        let env = plugin_env(config, remote_host, remote_port, local);
        let child = Command::new(&config.command)
            .args(&config.args)
            .envs(env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Plugin(format!("cannot start {}: {}", config.command, e)))?;

        tracing::info!(
            plugin = %config.command,
            remote = %format_args!("{}:{}", remote_host, remote_port),
            %local,
            "plugin started"
        );
        Ok(Self {
            name: config.command.clone(),
            child,
        })
    }

    /// Wait for the plugin to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| Error::Plugin(format!("{}: {}", self.name, e)))
    }

    /// Exit status if the plugin has already exited and been reaped.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child
            .try_wait()
            .map_err(|e| Error::Plugin(format!("{}: {}", self.name, e)))
    }

    /// Kill the plugin if it is still running.
    pub async fn kill(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill().await {
                tracing::warn!(plugin = %self.name, "failed to kill plugin: {}", e);
            } else {
                tracing::debug!(plugin = %self.name, "plugin killed");
            }
        }
    }
}

/// SIP003 environment for a plugin.
pub fn plugin_env(
    config: &PluginConfig,
    remote_host: &str,
    remote_port: u16,
    local: SocketAddr,
) -> Vec<(&'static str, String)> {
    let mut env = vec![
        ("SS_REMOTE_HOST", remote_host.to_string()),
        ("SS_REMOTE_PORT", remote_port.to_string()),
        ("SS_LOCAL_HOST", local.ip().to_string()),
        ("SS_LOCAL_PORT", local.port().to_string()),
    ];
    if let Some(options) = &config.options {
        env.push(("SS_PLUGIN_OPTIONS", options.clone()));
    }
    env
}

/// Reserve an unused loopback port for a plugin to listen on.
pub async fn free_loopback_port() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?)
}
