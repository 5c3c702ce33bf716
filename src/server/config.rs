//! Relay configuration.
//!
//! A [`ConfigFile`] is read from JSON (the customary Shadowsocks layout) or
//! TOML, overlaid with command-line values and turned into a validated
//! runtime [`Config`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::{CipherKind, CryptoContext, MasterKey};
use crate::error::{Error, Result};
use crate::protocol::Address;

/// Default idle timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default cipher method.
pub const DEFAULT_METHOD: CipherKind = CipherKind::ChaCha20Poly1305;

/// Default SOCKS5 listen address for the local side.
pub const DEFAULT_LOCAL_ADDRESS: &str = "127.0.0.1";

/// Default SOCKS5 listen port for the local side.
pub const DEFAULT_LOCAL_PORT: u16 = 1080;

/// Which end of the tunnel this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Accepts encrypted connections and dials targets
    Server,
    /// Accepts SOCKS5 connections and dials the server
    Local,
}

/// External SIP003 plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Executable to run
    pub command: String,
    /// Value passed as `SS_PLUGIN_OPTIONS`
    pub options: Option<String>,
    /// Extra command-line arguments
    pub args: Vec<String>,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Role of this process
    pub mode: Mode,
    /// Address to listen on
    pub bind: Address,
    /// Remote server, local mode only
    pub server: Option<Address>,
    /// Cipher method and master key
    pub crypto: CryptoContext,
    /// Idle timeout per peer
    pub timeout: Duration,
    /// Optional plugin
    pub plugin: Option<PluginConfig>,
    /// Set `TCP_NODELAY` on every socket
    pub no_delay: bool,
}

impl Config {
    /// Server-mode configuration with a password, mostly for tests.
    pub fn server(bind: Address, method: CipherKind, password: &str) -> Self {
        Self {
            mode: Mode::Server,
            bind,
            server: None,
            crypto: CryptoContext::from_password(method, password),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            plugin: None,
            no_delay: true,
        }
    }

    /// Local-mode configuration with a password, mostly for tests.
    pub fn local(bind: Address, server: Address, method: CipherKind, password: &str) -> Self {
        Self {
            mode: Mode::Local,
            server: Some(server),
            ..Self::server(bind, method, password)
        }
    }
}

/// On-disk configuration. Every field is optional so that files and
/// command-line flags can be layered.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server host (listen host in server mode)
    pub server: Option<String>,
    /// Server port
    pub server_port: Option<u16>,
    /// Local SOCKS5 listen host
    pub local_address: Option<String>,
    /// Local SOCKS5 listen port
    pub local_port: Option<u16>,
    /// Password stretched into the master key
    pub password: Option<String>,
    /// Raw master key, base64
    pub key: Option<String>,
    /// Cipher method name
    pub method: Option<String>,
    /// Idle timeout in seconds
    pub timeout: Option<u64>,
    /// Plugin executable
    pub plugin: Option<String>,
    /// Plugin options
    pub plugin_opts: Option<String>,
    /// Plugin command-line arguments
    pub plugin_args: Option<Vec<String>>,
    /// Disable Nagle's algorithm
    pub no_delay: Option<bool>,
}

impl ConfigFile {
    /// Load from `path`; `.toml` files are read as TOML, anything else as
    /// JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }

    /// Parse JSON.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::config(format!("invalid JSON config: {}", e)))
    }

    /// Parse TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid TOML config: {}", e)))
    }

    /// Overlay every field set in `other` on top of `self`.
    pub fn merge(&mut self, other: ConfigFile) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        overlay!(
            server,
            server_port,
            local_address,
            local_port,
            password,
            key,
            method,
            timeout,
            plugin,
            plugin_opts,
            plugin_args,
            no_delay
        );
    }

    /// Validate and build the runtime configuration for `mode`.
    pub fn into_config(self, mode: Mode) -> Result<Config> {
        let method = match &self.method {
            Some(name) => name.parse::<CipherKind>()?,
            None => DEFAULT_METHOD,
        };

        let crypto = match (&self.key, &self.password) {
            (Some(key), _) => CryptoContext::new(method, MasterKey::from_base64(key)?)?,
            (None, Some(password)) if !password.is_empty() => CryptoContext::from_password(method, password),
            _ => return Err(Error::config("either password or key must be set")),
        };

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(Error::config("timeout must be positive"));
        }

        let server_endpoint = match (&self.server, self.server_port) {
            (Some(host), Some(port)) => Some(parse_host(host, port)?),
            (Some(_), None) => return Err(Error::config("server_port is required")),
            _ => None,
        };

        let (bind, server) = match mode {
            Mode::Server => {
                let bind = match server_endpoint {
                    Some(addr) => addr,
                    None => match self.server_port {
                        Some(port) => parse_host("0.0.0.0", port)?,
                        None => return Err(Error::config("server_port is required")),
                    },
                };
                (bind, None)
            }
            Mode::Local => {
                let server = server_endpoint
                    .ok_or_else(|| Error::config("local mode needs a server address"))?;
                let host = self.local_address.as_deref().unwrap_or(DEFAULT_LOCAL_ADDRESS);
                let bind = parse_host(host, self.local_port.unwrap_or(DEFAULT_LOCAL_PORT))?;
                (bind, Some(server))
            }
        };

        let plugin = match self.plugin {
            Some(command) if !command.is_empty() => Some(PluginConfig {
                command,
                options: self.plugin_opts.filter(|opts| !opts.is_empty()),
                args: self.plugin_args.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Config {
            mode,
            bind,
            server,
            crypto,
            timeout: Duration::from_secs(timeout),
            plugin,
            no_delay: self.no_delay.unwrap_or(true),
        })
    }
}

/// Build an address from a host that may be an IP literal or a name.
pub fn parse_host(host: &str, port: u16) -> Result<Address> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(Error::config("empty host"));
    }
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => Ok(Address::Socket((ip, port).into())),
        Err(_) if host.len() <= 255 => Ok(Address::Domain(host.to_string(), port)),
        Err(_) => Err(Error::config(format!("host name too long: {}", host))),
    }
}

/// Split `host:port`, accepting `[v6]:port`.
pub fn split_host_port(endpoint: &str) -> Result<(String, u16)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| Error::config(format!("expected host:port, got {}", endpoint)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::config(format!("invalid port in {}", endpoint)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}
