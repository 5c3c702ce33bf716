//! Command-line front end shared by both binaries.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::crypto::{CipherKind, MasterKey};
use crate::error::{Error, Result};
use crate::server::config::split_host_port;
use crate::server::{ConfigFile, Mode};

/// Relay command-line arguments.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about = "AEAD-encrypted TCP relay")]
pub struct Args {
    /// Config file path (.json or .toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8388
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Remote server address (local mode), e.g. relay.example.com:8388
    #[arg(short, long)]
    pub server: Option<String>,

    /// Cipher method
    #[arg(short, long)]
    pub method: Option<String>,

    /// Password
    #[arg(short = 'k', long)]
    pub password: Option<String>,

    /// Base64 master key, used instead of a password
    #[arg(long)]
    pub key: Option<String>,

    /// Idle timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// SIP003 plugin executable
    #[arg(long)]
    pub plugin: Option<String>,

    /// SIP003 plugin options
    #[arg(long)]
    pub plugin_opts: Option<String>,

    /// Extra argument for the plugin executable (repeatable)
    #[arg(long = "plugin-arg", allow_hyphen_values = true)]
    pub plugin_args: Vec<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print a random base64 key for the selected method and exit
    #[arg(long)]
    pub genkey: bool,
}

impl Args {
    /// Command-line values as a config layer for `mode`.
    pub fn overrides(&self, mode: Mode) -> Result<ConfigFile> {
        let mut file = ConfigFile {
            password: self.password.clone(),
            key: self.key.clone(),
            method: self.method.clone(),
            timeout: self.timeout,
            plugin: self.plugin.clone(),
            plugin_opts: self.plugin_opts.clone(),
            plugin_args: (!self.plugin_args.is_empty()).then(|| self.plugin_args.clone()),
            ..Default::default()
        };

        if let Some(bind) = &self.bind {
            let (host, port) = split_host_port(bind)?;
            match mode {
                Mode::Server => {
                    file.server = Some(host);
                    file.server_port = Some(port);
                }
                Mode::Local => {
                    file.local_address = Some(host);
                    file.local_port = Some(port);
                }
            }
        }
        if let Some(server) = &self.server {
            if mode == Mode::Server {
                return Err(Error::config("--server only applies to the local side, use --bind"));
            }
            let (host, port) = split_host_port(server)?;
            file.server = Some(host);
            file.server_port = Some(port);
        }
        Ok(file)
    }

    /// Load the config file, if any, and overlay the command line.
    pub fn load(&self, mode: Mode) -> Result<ConfigFile> {
        let mut file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        file.merge(self.overrides(mode)?);
        Ok(file)
    }

    /// Log filter: `RUST_LOG` wins, otherwise derived from `-v`.
    pub fn log_filter(&self) -> EnvFilter {
        let level = match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(args: &Args) {
    tracing_subscriber::fmt()
        .with_env_filter(args.log_filter())
        .with_target(false)
        .init();
}

/// Random key for `--genkey`.
pub fn generate_key(args: &Args) -> Result<String> {
    let kind = match &args.method {
        Some(name) => name.parse::<CipherKind>()?,
        None => crate::server::config::DEFAULT_METHOD,
    };
    Ok(MasterKey::random(kind.key_len()).to_base64())
}

/// Parse arguments and run a relay in `mode` until SIGINT or SIGTERM.
pub async fn run(args: Args, mode: Mode) -> anyhow::Result<()> {
    if args.genkey {
        println!("{}", generate_key(&args)?);
        return Ok(());
    }

    init_tracing(&args);
    let config = args.load(mode)?.into_config(mode)?;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_handler().await;
        tracing::info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    crate::server::run_with_shutdown(config, shutdown).await?;
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
